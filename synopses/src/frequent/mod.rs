mod count_min;

pub use count_min::CountMinSketch;
