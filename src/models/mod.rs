pub mod log;
pub mod value;

pub use log::{
    ActivityEntry, ActivityVerdict, AnalysisResult, IpSummary, LogRecord, LogSample, SampleFilter,
    StoredLog,
};
pub use value::StoreValue;
