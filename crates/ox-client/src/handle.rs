//! Typed wrappers around the service's opaque 64-bit handles. Zero is the
//! null handle for every kind.

macro_rules! define_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub const NULL: Self = Self(0);

            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub fn raw(self) -> u64 {
                self.0
            }

            pub fn is_null(self) -> bool {
                self.0 == 0
            }
        }
    };
}

define_handle!(
    /// An OpenXR instance as seen by this client library.
    InstanceHandle
);
define_handle!(
    /// The single active session.
    SessionHandle
);
define_handle!(
    /// A reference or action space.
    SpaceHandle
);
define_handle!(
    /// A group of actions attached together.
    ActionSetHandle
);
define_handle!(
    /// A named, typed input the application queries.
    ActionHandle
);
define_handle!(
    /// A rotating set of eye textures.
    SwapchainHandle
);
define_handle!(
    /// An interned path token, stable for the life of the instance.
    PathHandle
);
