//! 资源模型、登记表、版本与地址改写。

pub mod models;
pub mod registry;
pub mod url_rewrite;
pub mod version;
