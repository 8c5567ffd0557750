use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client-minted identifiers; time-ordered so transcripts sort by creation.
macro_rules! stream_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(formatter)
            }
        }
    };
}

stream_id!(
    /// Transcript message; also the target of an assistant stream.
    MessageId
);
stream_id!(
    /// One request/response cycle.
    SessionId
);
