//! 共享库
//!
//! 包含规则引擎各个入口共用的配置加载与可观测性初始化代码。

pub mod config;
pub mod observability;
