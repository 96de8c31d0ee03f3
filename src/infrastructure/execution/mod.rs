pub mod paper;

pub use paper::PaperExecutionService;
