pub mod driver;
pub mod engine;
pub mod error;
pub mod session;
pub mod timing;

pub use engine::{
    confirm_channel, ConfirmDecision, ConfirmGate, ConfirmHandle, DispatchConfig, DispatchEngine,
    DispatchOutcome, DispatchPhase, DispatchRequest, DispatchVerdict,
};
pub use error::DispatchError;
pub use session::{BrowserSession, MockSession};
pub use timing::JitterWindow;
