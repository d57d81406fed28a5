pub mod client;
pub mod types;

pub use client::ProviderGateway;
pub use types::{ParsedReference, PlaybackSnapshot, PlaylistInfo, PlaylistTrack, ReferenceKind, RefreshedTokens, TrackInfo};
