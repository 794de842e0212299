// Resume fit analysis: session stages, the upload → extract → stream pipeline,
// the display accumulator and the HTTP handlers driving them.

pub mod display;
pub mod handlers;
pub mod pipeline;
pub mod session;
