mod sample;

pub use sample::SampleTask;
