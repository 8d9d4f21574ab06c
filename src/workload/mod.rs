//! Member pod workloads
//!
//! - [`template`] assembles the pod the operator creates for each member
//! - [`member`] reads back the fields the bootstrap logic depends on

mod member;
mod template;

pub use member::{MemberPod, PodPhase};
pub use template::{MemberPodTemplate, CLIENT_PORT_NAME, CONTAINER_NAME, NODENAME_ENV};

/// Fresh, unique member pod name
pub fn generate_pod_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", crate::APP_NAME, &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_names_are_prefixed_and_distinct() {
        let a = generate_pod_name();
        let b = generate_pod_name();
        assert!(a.starts_with("couchdb-"));
        assert_eq!(a.len(), "couchdb-".len() + 8);
        assert_ne!(a, b);
    }
}
