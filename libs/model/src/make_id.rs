/// Defines a typed identifier backed by a UUID.
///
/// Keeping network/device/peer/tenant ids as distinct types (rather than
/// passing bare `String`s around) makes it a compile error to pass a
/// `DeviceId` where a `NetworkId` is expected.
macro_rules! make_id {
    ($name:ident) => {
        #[derive(
            Hash,
            ::serde::Deserialize,
            ::serde::Serialize,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
        )]
        pub struct $name(::uuid::Uuid);

        impl $name {
            pub fn random() -> Self {
                Self(::uuid::Uuid::new_v4())
            }

            pub fn from_uuid(id: ::uuid::Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> ::uuid::Uuid {
                self.0
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = ::uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(::uuid::Uuid::parse_str(s)?))
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                ::std::fmt::Display::fmt(self, f)
            }
        }
    };
}

pub(crate) use make_id;
