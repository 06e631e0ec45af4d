use base64::prelude::*;

pub(crate) fn base64url<T: ?Sized + AsRef<[u8]>>(input: &T) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(input)
}

/// Serde adapter for byte strings as unpadded base64url.
pub(crate) mod b64 {
    use base64::prelude::*;
    use serde::{de, Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&super::base64url(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(de)?;
        BASE64_URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(de::Error::custom)
    }
}

pub(crate) mod b64_opt {
    use base64::prelude::*;
    use serde::{de, Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, ser: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => ser.serialize_some(&super::base64url(bytes)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(de)?
            .map(|encoded| BASE64_URL_SAFE_NO_PAD.decode(encoded))
            .transpose()
            .map_err(de::Error::custom)
    }
}

/// Serde adapter for optional durations given in whole seconds.
pub(crate) mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize as _, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(de)?.map(Duration::from_secs))
    }
}
