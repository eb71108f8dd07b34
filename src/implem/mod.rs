pub mod encoder;
pub mod frame;
pub mod handoff;
pub mod sdp;
pub mod settings;
