//! Translation from a source app descriptor to the canonical target
//! description serialized into generation prompts.

use serde::Serialize;

use crate::descriptor::AppDescriptor;

/// Canonical description of one app on the destination cloud.
#[derive(Debug, Clone, Serialize)]
pub struct TargetSpec {
    pub app_name: String,
    /// Destination cloud identifier ("aws", "gcp", "scaleway").
    pub destination: String,
    /// The normalized source stack the generated configuration must cover.
    pub stack: AppDescriptor,
}

pub fn translate(descriptor: &AppDescriptor, destination: &str) -> TargetSpec {
    TargetSpec {
        app_name: descriptor.name.clone(),
        destination: destination.to_owned(),
        stack: descriptor.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_carries_identity_and_destination() {
        let mut descriptor = AppDescriptor::new("worker");
        descriptor.env.insert("QUEUE_URL".into(), "redis://".into());

        let spec = translate(&descriptor, "gcp");
        assert_eq!(spec.app_name, "worker");
        assert_eq!(spec.destination, "gcp");
        assert_eq!(spec.stack.env.get("QUEUE_URL").map(String::as_str), Some("redis://"));
    }
}
