// Rendering frame segmentation
//
// Cuts the capture into consecutive frame intervals. Two production models
// are supported: a single-threaded one where frames are bounded by
// consecutive main-frame markers, and the compositor-threaded one driven by
// begin/draw/activate markers. The first compositor marker switches the
// machine to the threaded model for the rest of the capture.

mod builder;
mod frame;
mod state_machine;

pub use builder::build_frames;
pub use frame::{Frame, FrameIndex, FrameState, LayerPaint};
pub use state_machine::{FrameStateMachine, PendingFrame};
