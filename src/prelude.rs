pub use crate::curve::TuningCurve;
pub use crate::model::CircularModel;
pub use crate::pipeline::ChunkSink;
