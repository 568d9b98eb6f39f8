use snafu::prelude::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("sketch dimensions must be positive, got depth {depth} and width {width}"))]
    InvalidDimensions { depth: usize, width: usize },
    #[snafu(display(
        "cannot merge a {}x{} sketch into a {}x{} sketch",
        right.0,
        right.1,
        left.0,
        left.1
    ))]
    IncompatibleSketch {
        left: (usize, usize),
        right: (usize, usize),
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
