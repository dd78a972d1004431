use crate::{ObjectStore, StorageError};

/// Uploads through `primary` and, when that fails at the transport level, tries `fallback`
/// exactly once. Any other failure is returned unchanged.
#[derive(Debug, Clone)]
pub struct FallbackObjectStore<P, F> {
    primary: P,
    fallback: F,
}

impl<P, F> FallbackObjectStore<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }
}

impl<P: ObjectStore, F: ObjectStore> ObjectStore for FallbackObjectStore<P, F> {
    fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError> {
        match self.primary.put(bucket, path, bytes, content_type) {
            Err(err) if err.is_transient() => {
                log::warn!("upload of {bucket}/{path} failed ({err}), retrying with raw request");
                self.fallback.put(bucket, path, bytes, content_type)
            }
            other => other,
        }
    }
}
