//! Declarative resource model: the kinds the control plane reads and writes.
//!
//! `Object` is the closed union the resource store holds; each concrete kind
//! implements [`Resource`] so callers can work with typed values.

pub mod agent;
pub mod memory;
pub mod meta;
pub mod model_config;
pub mod reference;
pub mod status;
pub mod tool_server;
pub mod workload;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use agent::*;
pub use memory::*;
pub use meta::*;
pub use model_config::*;
pub use reference::{ObjectRef, ReferenceError, resolve};
pub use status::*;
pub use tool_server::*;
pub use workload::*;

/// API version stamped on owner references of synthesized manifests.
pub const API_VERSION: &str = "agentplane.dev/v1alpha1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Agent,
    ModelConfig,
    ToolServer,
    RemoteMcpServer,
    Memory,
    Secret,
    ConfigMap,
    Service,
    ServiceAccount,
    Deployment,
}

impl Kind {
    pub const ALL: [Kind; 10] = [
        Kind::Agent,
        Kind::ModelConfig,
        Kind::ToolServer,
        Kind::RemoteMcpServer,
        Kind::Memory,
        Kind::Secret,
        Kind::ConfigMap,
        Kind::Service,
        Kind::ServiceAccount,
        Kind::Deployment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Agent => "Agent",
            Kind::ModelConfig => "ModelConfig",
            Kind::ToolServer => "ToolServer",
            Kind::RemoteMcpServer => "RemoteMCPServer",
            Kind::Memory => "Memory",
            Kind::Secret => "Secret",
            Kind::ConfigMap => "ConfigMap",
            Kind::Service => "Service",
            Kind::ServiceAccount => "ServiceAccount",
            Kind::Deployment => "Deployment",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown kind '{s}'"))
    }
}

/// Any object held by the resource store, discriminated by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Object {
    Agent(Agent),
    ModelConfig(ModelConfig),
    ToolServer(ToolServer),
    #[serde(rename = "RemoteMCPServer")]
    RemoteMcpServer(RemoteMcpServer),
    Memory(Memory),
    Secret(Secret),
    ConfigMap(ConfigMap),
    Service(Service),
    ServiceAccount(ServiceAccount),
    Deployment(Deployment),
}

macro_rules! each_object {
    ($obj:expr, $o:ident => $body:expr) => {
        match $obj {
            Object::Agent($o) => $body,
            Object::ModelConfig($o) => $body,
            Object::ToolServer($o) => $body,
            Object::RemoteMcpServer($o) => $body,
            Object::Memory($o) => $body,
            Object::Secret($o) => $body,
            Object::ConfigMap($o) => $body,
            Object::Service($o) => $body,
            Object::ServiceAccount($o) => $body,
            Object::Deployment($o) => $body,
        }
    };
}

impl Object {
    pub fn kind(&self) -> Kind {
        match self {
            Object::Agent(_) => Kind::Agent,
            Object::ModelConfig(_) => Kind::ModelConfig,
            Object::ToolServer(_) => Kind::ToolServer,
            Object::RemoteMcpServer(_) => Kind::RemoteMcpServer,
            Object::Memory(_) => Kind::Memory,
            Object::Secret(_) => Kind::Secret,
            Object::ConfigMap(_) => Kind::ConfigMap,
            Object::Service(_) => Kind::Service,
            Object::ServiceAccount(_) => Kind::ServiceAccount,
            Object::Deployment(_) => Kind::Deployment,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        each_object!(self, o => &o.metadata)
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        each_object!(self, o => &mut o.metadata)
    }

    pub fn object_ref(&self) -> ObjectRef {
        self.metadata().object_ref()
    }

    /// Replace this object's status with `other`'s. Returns false when the
    /// kinds differ or the kind carries no status.
    pub fn copy_status_from(&mut self, other: &Object) -> bool {
        match (self, other) {
            (Object::Agent(a), Object::Agent(b)) => a.status = b.status.clone(),
            (Object::ModelConfig(a), Object::ModelConfig(b)) => a.status = b.status.clone(),
            (Object::ToolServer(a), Object::ToolServer(b)) => a.status = b.status.clone(),
            (Object::RemoteMcpServer(a), Object::RemoteMcpServer(b)) => {
                a.status = b.status.clone()
            }
            (Object::Memory(a), Object::Memory(b)) => a.status = b.status.clone(),
            (Object::Deployment(a), Object::Deployment(b)) => a.status = b.status.clone(),
            _ => return false,
        }
        true
    }

    /// Everything except metadata and status; a change here bumps generation.
    pub fn spec_fingerprint(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(map) = value.as_object_mut() {
            map.remove("metadata");
            map.remove("status");
        }
        value
    }
}

/// A concrete kind stored as one `Object` variant.
pub trait Resource: Sized + Clone + Send + Sync + 'static {
    const KIND: Kind;
    fn metadata(&self) -> &ObjectMeta;
    fn into_object(self) -> Object;
    fn from_object(object: Object) -> Option<Self>;

    fn object_ref(&self) -> ObjectRef {
        self.metadata().object_ref()
    }
}

macro_rules! impl_resource {
    ($ty:ty, $variant:ident) => {
        impl Resource for $ty {
            const KIND: Kind = Kind::$variant;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn into_object(self) -> Object {
                Object::$variant(self)
            }

            fn from_object(object: Object) -> Option<Self> {
                match object {
                    Object::$variant(o) => Some(o),
                    _ => None,
                }
            }
        }
    };
}

impl_resource!(Agent, Agent);
impl_resource!(ModelConfig, ModelConfig);
impl_resource!(ToolServer, ToolServer);
impl_resource!(RemoteMcpServer, RemoteMcpServer);
impl_resource!(Memory, Memory);
impl_resource!(Secret, Secret);
impl_resource!(ConfigMap, ConfigMap);
impl_resource!(Service, Service);
impl_resource!(ServiceAccount, ServiceAccount);
impl_resource!(Deployment, Deployment);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_kind_tag_round_trips_through_yaml() {
        let yaml = r#"
apiVersion: agentplane.dev/v1alpha1
kind: RemoteMCPServer
metadata:
  name: search
  namespace: tools
spec:
  url: http://search.tools:8080/mcp
  protocol: SSE
"#;
        let obj: Object = serde_yaml::from_str(yaml).expect("parse object");
        assert_eq!(obj.kind(), Kind::RemoteMcpServer);
        assert_eq!(obj.object_ref().to_string(), "tools/search");
        let Object::RemoteMcpServer(server) = &obj else {
            panic!("wrong variant");
        };
        assert_eq!(server.spec.protocol, McpProtocol::Sse);
    }

    #[test]
    fn fingerprint_ignores_status_and_metadata() {
        let mut a = ModelConfig {
            metadata: ObjectMeta::new("ns", "m"),
            ..Default::default()
        };
        a.spec.model = "gpt-4o".into();
        let mut b = a.clone();
        b.metadata.generation = 7;
        b.status.observed_generation = 7;
        assert_eq!(
            a.clone().into_object().spec_fingerprint(),
            b.into_object().spec_fingerprint()
        );
        let mut c = a.clone();
        c.spec.model = "gpt-5".into();
        assert_ne!(
            a.into_object().spec_fingerprint(),
            c.into_object().spec_fingerprint()
        );
    }

    #[test]
    fn kind_parses_from_display_name() {
        for kind in Kind::ALL {
            assert_eq!(kind.as_str().parse::<Kind>(), Ok(kind));
        }
        assert!("Pod".parse::<Kind>().is_err());
    }
}
