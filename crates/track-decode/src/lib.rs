pub mod backend;
pub mod chapters;
pub mod config;
pub mod delivery;
pub mod error;
pub mod filter;
pub mod frame;
pub mod probe;
pub mod prober;
pub mod queue;
pub mod resample;
pub mod session;

pub use backend::symphonia_backend::SymphoniaBackend;
pub use backend::{MediaBackend, SourceRef};
pub use chapters::SeekTarget;
pub use config::DecoderConfig;
pub use delivery::{BlockReceiver, DeliveryBridge, delivery_channel};
pub use error::{DecodeError, Result};
pub use frame::{AudioFormat, SampleBlock};
pub use probe::probe;
pub use prober::{avformatinfo, render_probe};
pub use session::{
    Command, DecodeSession, SessionEvent, SessionHandle, SessionOptions, SessionState,
    spawn_session,
};
pub use track_decode_types::{ChapterInfo, EndReason, ErrorKind, ProbeResult, StreamFormat};
