//! Execution binding — the `(host, port, container_id?)` fixed to an
//! execution after a successful image pull / run.
//!
//! A prior implementation carried this as an untyped string-keyed metadata
//! bag with manual key deletion on failure. This enum keeps the normal-path
//! invariant "container_id implies host+port" a compile-time property,
//! while still modeling the one state the source allows it to violate:
//! after a connection failure, `host`/`port` are cleared but a previously
//! bound `container_id` survives (spec: "clearing host/port on connection
//! failure does NOT clear container_id") until the scheduler retries from
//! image-pull.

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Binding {
    #[default]
    Unbound,
    BoundHost {
        host: String,
        port: u16,
    },
    BoundContainer {
        host: String,
        port: u16,
        container_id: String,
    },
    /// Host cleared by a connection failure; `container_id` is preserved
    /// but unusable until the scheduler re-selects a host and re-creates
    /// the container (it has no host to be fetched from in this state).
    OrphanedContainer {
        container_id: String,
    },
}

impl Binding {
    pub fn host_port(&self) -> Option<(&str, u16)> {
        match self {
            Binding::Unbound | Binding::OrphanedContainer { .. } => None,
            Binding::BoundHost { host, port } => Some((host, *port)),
            Binding::BoundContainer { host, port, .. } => Some((host, *port)),
        }
    }

    pub fn container_id(&self) -> Option<&str> {
        match self {
            Binding::BoundContainer { container_id, .. } => Some(container_id),
            Binding::OrphanedContainer { container_id } => Some(container_id),
            _ => None,
        }
    }

    /// Bind to a host after a successful selection/pull.
    pub fn bind_host(&mut self, host: String, port: u16) {
        *self = Binding::BoundHost { host, port };
    }

    /// Record the container started on the already-bound host.
    ///
    /// Panics if called while unbound — callers must bind a host first.
    pub fn bind_container(&mut self, container_id: String) {
        let (host, port) = self
            .host_port()
            .map(|(h, p)| (h.to_string(), p))
            .expect("bind_container called on an unbound execution");
        *self = Binding::BoundContainer {
            host,
            port,
            container_id,
        };
    }

    /// Clear the binding's host/port after a connection-class failure.
    ///
    /// A previously bound `container_id` is carried over into
    /// `OrphanedContainer` rather than dropped, matching the source's
    /// behavior of leaving `container_id` in place while deleting only
    /// `host`/`port` from the metadata bag.
    pub fn clear_host(&mut self) {
        *self = match std::mem::take(self) {
            Binding::BoundContainer { container_id, .. } => Binding::OrphanedContainer { container_id },
            Binding::OrphanedContainer { container_id } => Binding::OrphanedContainer { container_id },
            Binding::Unbound | Binding::BoundHost { .. } => Binding::Unbound,
        };
    }
}
