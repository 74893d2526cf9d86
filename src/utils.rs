
/// implement packbytes traits for a bilge bitfield, using its `raw` and `from_raw` methods and the given storage integer
#[macro_export]
macro_rules! pack_bilge {
    ($t:ty, $int:ty) => {

        impl packbytes::ToBytes for $t {
            type Bytes = [u8; core::mem::size_of::<$int>()];

            fn to_le_bytes(self) -> Self::Bytes {
                self.raw().to_le_bytes()
            }
            fn to_be_bytes(self) -> Self::Bytes {
                self.raw().to_be_bytes()
            }
        }
        impl packbytes::FromBytes for $t {
            type Bytes = [u8; core::mem::size_of::<$int>()];

            fn from_le_bytes(bytes: Self::Bytes) -> Self {
                <$t>::from_raw(<$int>::from_le_bytes(bytes))
            }
            fn from_be_bytes(bytes: Self::Bytes) -> Self {
                <$t>::from_raw(<$int>::from_be_bytes(bytes))
            }
        }
    };
}
