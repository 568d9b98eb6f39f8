mod fm_sketch;

pub use fm_sketch::FmSketch;
