mod classifier;
mod preprocess;

pub use classifier::{rank, Classifier, VisionError, CONFIG_FILE, PROCESSOR_FILE, WEIGHTS_FILE};
pub use preprocess::ProcessorConfig;
