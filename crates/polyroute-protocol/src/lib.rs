mod proto;
mod sse;
mod value;

pub use proto::{EntryEndpoint, Protocol, ProviderFamily};
pub use sse::{SseEvent, SseParser, frame_data, frame_done, frame_event};
pub use value::{
    ShapeError, as_array, as_object, as_str, ensure_object_mut, get, get_array, get_bool, get_i64,
    get_object, get_str, get_u64, path_of, set,
};
