pub mod bar_accumulator;
pub mod feed;

pub use bar_accumulator::BarAccumulator;
pub use feed::FeedIngestor;
