pub mod amplify;
pub mod analyze;
pub mod caption;
pub mod event_log;
pub mod orchestrator;
pub mod render;
pub mod selector;

pub use amplify::{
    compute_delay, AmplificationScheduler, AmplificationTask, AmplifyConfig, AmplifyStrategy,
    TaskStatus,
};
pub use analyze::{Analyzer, GitCliAnalyzer, StaticAnalyzer};
pub use orchestrator::{
    run_worker, Pipeline, RunFlags, RunMode, RunOutcome, RunReport, RunRequest, RunStage,
};
pub use render::{HtmlRenderer, MockRenderer, RenderData, Renderer};
pub use selector::{Selection, SelectorConfig, TemplateSelector};
