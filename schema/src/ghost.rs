//! Ghost type definitions: prefab node hierarchy and per-node overrides.

use crate::component::{PrefabTypes, SendRule};

/// How clients represent a ghost type by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GhostMode {
    #[default]
    Interpolated,
    Predicted,
    /// Predicted on the owning client, interpolated everywhere else.
    OwnerPredicted,
}

impl GhostMode {
    /// Resolves the representation for a client given ghost ownership.
    #[must_use]
    pub const fn representation(self, owned_by_client: bool) -> Representation {
        match self {
            Self::Interpolated => Representation::Interpolated,
            Self::Predicted => Representation::Predicted,
            Self::OwnerPredicted if owned_by_client => Representation::Predicted,
            Self::OwnerPredicted => Representation::Interpolated,
        }
    }
}

/// Runtime client-side representation of a ghost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Representation {
    Interpolated,
    Predicted,
}

impl Representation {
    /// The prefab flavour a component must belong to for this representation.
    #[must_use]
    pub const fn prefab_type(self) -> PrefabTypes {
        match self {
            Self::Interpolated => PrefabTypes::INTERPOLATED_CLIENT,
            Self::Predicted => PrefabTypes::PREDICTED_CLIENT,
        }
    }
}

/// Server-side send optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OptimizationMode {
    /// Sent every eligible tick.
    #[default]
    Dynamic,
    /// Skipped while unchanged against an acknowledged baseline.
    Static,
}

/// Overrides applied to one component on one prefab node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ComponentOverride {
    pub variant: Option<String>,
    pub send_rule: Option<SendRule>,
    pub prefab_types: Option<PrefabTypes>,
    pub send_data_for_child_entity: Option<bool>,
}

impl ComponentOverride {
    #[must_use]
    pub fn variant(mut self, name: impl Into<String>) -> Self {
        self.variant = Some(name.into());
        self
    }

    #[must_use]
    pub const fn send_rule(mut self, rule: SendRule) -> Self {
        self.send_rule = Some(rule);
        self
    }

    #[must_use]
    pub const fn prefab_types(mut self, types: PrefabTypes) -> Self {
        self.prefab_types = Some(types);
        self
    }

    #[must_use]
    pub const fn send_data_for_child_entity(mut self, send: bool) -> Self {
        self.send_data_for_child_entity = Some(send);
        self
    }
}

/// A component placed on a prefab node.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeComponent {
    pub component: String,
    pub overrides: ComponentOverride,
}

/// One node of a ghost prefab hierarchy. Node 0 is the root.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrefabNode {
    pub name: String,
    pub parent: Option<usize>,
    pub components: Vec<NodeComponent>,
}

impl PrefabNode {
    #[must_use]
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            components: Vec::new(),
        }
    }

    /// A child of node `parent`; nested children name another child.
    #[must_use]
    pub fn child(name: impl Into<String>, parent: usize) -> Self {
        Self {
            name: name.into(),
            parent: Some(parent),
            components: Vec::new(),
        }
    }

    #[must_use]
    pub fn component(self, component: impl Into<String>) -> Self {
        self.component_with(component, ComponentOverride::default())
    }

    #[must_use]
    pub fn component_with(
        mut self,
        component: impl Into<String>,
        overrides: ComponentOverride,
    ) -> Self {
        self.components.push(NodeComponent {
            component: component.into(),
            overrides,
        });
        self
    }
}

/// Names a field by node, component and field name.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldPath {
    pub node: usize,
    pub component: String,
    pub field: String,
}

impl FieldPath {
    /// A field on the root node.
    #[must_use]
    pub fn root(component: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            node: 0,
            component: component.into(),
            field: field.into(),
        }
    }
}

/// Authoring-side description of a ghost type.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GhostTypeDef {
    pub name: String,
    pub nodes: Vec<PrefabNode>,
    pub mode: GhostMode,
    pub optimization: OptimizationMode,
    /// Replication frequency cap in Hz.
    pub max_send_rate: Option<u32>,
    pub importance: u32,
    /// Float3 field blended during prediction switches.
    pub transform: Option<FieldPath>,
}

impl GhostTypeDef {
    /// Creates a ghost type with an empty root node.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            nodes: vec![PrefabNode::root(name.clone())],
            name,
            mode: GhostMode::Interpolated,
            optimization: OptimizationMode::Dynamic,
            max_send_rate: None,
            importance: 1,
            transform: None,
        }
    }

    /// Adds a component to the root node.
    #[must_use]
    pub fn component(self, component: impl Into<String>) -> Self {
        self.component_with(component, ComponentOverride::default())
    }

    /// Adds a component with overrides to the root node.
    #[must_use]
    pub fn component_with(
        mut self,
        component: impl Into<String>,
        overrides: ComponentOverride,
    ) -> Self {
        if let Some(root) = self.nodes.first_mut() {
            root.components.push(NodeComponent {
                component: component.into(),
                overrides,
            });
        }
        self
    }

    /// Appends a child node.
    #[must_use]
    pub fn node(mut self, node: PrefabNode) -> Self {
        self.nodes.push(node);
        self
    }

    #[must_use]
    pub const fn mode(mut self, mode: GhostMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub const fn optimization(mut self, optimization: OptimizationMode) -> Self {
        self.optimization = optimization;
        self
    }

    #[must_use]
    pub const fn max_send_rate(mut self, hz: u32) -> Self {
        self.max_send_rate = Some(hz);
        self
    }

    #[must_use]
    pub const fn importance(mut self, importance: u32) -> Self {
        self.importance = importance;
        self
    }

    #[must_use]
    pub fn transform(mut self, path: FieldPath) -> Self {
        self.transform = Some(path);
        self
    }
}
