//! # Finalizer module
//!
//! This module provide helpers methods to interact with kubernetes' resource
//! finalizer

use kube::Resource;

/// returns if there is the given finalizer on the resource
pub fn contains<T>(obj: &T, finalizer: &str) -> bool
where
    T: Resource,
{
    obj.meta()
        .finalizers
        .as_ref()
        .map(|finalizers| finalizers.iter().any(|f| finalizer == f))
        .unwrap_or(false)
}

/// add finalizer to the resource, if it is not already present
pub fn add<T>(mut obj: T, finalizer: &str) -> T
where
    T: Resource,
{
    let finalizers = obj.meta_mut().finalizers.get_or_insert_with(Vec::new);
    if !finalizers.iter().any(|f| finalizer == f) {
        finalizers.push(finalizer.to_owned());
    }

    obj
}

/// remove finalizer from the resource
pub fn remove<T>(mut obj: T, finalizer: &str) -> T
where
    T: Resource,
{
    if let Some(finalizers) = obj.meta_mut().finalizers.as_mut() {
        finalizers.retain(|f| f != finalizer);
    }

    obj
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Secret;

    use super::*;

    const FINALIZER: &str = "finalizer.managedresource.crossplane.io";

    #[test]
    fn add_is_idempotent() {
        let secret = add(add(Secret::default(), FINALIZER), FINALIZER);

        assert!(contains(&secret, FINALIZER));
        assert_eq!(secret.metadata.finalizers, Some(vec![FINALIZER.to_string()]));
    }

    #[test]
    fn remove_keeps_other_finalizers() {
        let secret = add(add(Secret::default(), "other"), FINALIZER);
        let secret = remove(secret, FINALIZER);

        assert!(!contains(&secret, FINALIZER));
        assert!(contains(&secret, "other"));
    }

    #[test]
    fn remove_on_resource_without_finalizers() {
        let secret = remove(Secret::default(), FINALIZER);

        assert!(!contains(&secret, FINALIZER));
        assert_eq!(secret.metadata.finalizers, None);
    }
}
