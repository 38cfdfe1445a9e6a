//! 动态调度与参数编组：操作注册表、声明式参数表、执行器、Stripe 操作集

pub mod executor;
pub mod registry;
pub mod schema;
pub mod stripe;

pub use executor::{ActionExecutor, ActionRequest};
pub use registry::{ActionOutput, Operation, OperationRegistry};
pub use schema::{marshal_request, Field, FieldKind, ParamValue, Params};
