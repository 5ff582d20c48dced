/// Easy PVE Console - 公共库
/// 
/// 提供 Server 使用的领域类型、操作协议、凭据与错误处理

pub mod credentials;
pub mod errors;
pub mod models;
pub mod protocol;
pub mod utils;

// 重新导出常用类型
pub use credentials::Credentials;
pub use errors::{Error, Result};
pub use protocol::{Action, ActionName, ActionOutput, ActionRequest};
