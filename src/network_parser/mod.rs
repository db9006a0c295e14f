//! 网络层：所有上游请求与下载共用的 HTTP 客户端。

pub mod network;
