pub mod config;
pub mod douyin;
pub mod util; // doctestのためpubにする

pub use config::ClientConfig;
pub use douyin::{
    CollectorManager, ConnectionState, EventData, LiveError, LiveEvent, LiveSession,
    MessageMethod, ScriptSigner, SignatureProvider,
};
