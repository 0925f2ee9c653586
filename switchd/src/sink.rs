/// An output device as enumerated by the audio server. `id` is the
/// server-assigned index and is not stable across server restarts; `name`
/// (the device description) is the identity key shells work with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sink {
    pub id: u32,
    pub name: String,
    pub ordinal: u32,
}

/// A live stream and the sink it is currently attached to. Only read within
/// a single switch operation, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRoute {
    pub id: u32,
    pub sink: u32,
}
