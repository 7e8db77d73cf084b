//! Class descriptors: hierarchy, lifecycle hooks, and member visibility

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;

use super::{Access, ObjectRef};
use crate::error::{CoreError, ExceptionSink};

/// Body of a constructor or destructor.
pub type MethodBody = Arc<dyn Fn(&ObjectRef, &mut ExceptionSink) + Send + Sync>;

/// Process-unique class identity, used to key per-class private data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u64);

static NEXT_CLASS_ID: AtomicU64 = AtomicU64::new(1);

impl ClassId {
    fn next() -> Self {
        ClassId(NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Immutable description of a class.
pub struct ClassDescriptor {
    id: ClassId,
    name: String,
    parents: Vec<Arc<ClassDescriptor>>,
    constructor: Option<MethodBody>,
    destructor: Option<MethodBody>,
    private_members: IndexSet<String>,
    public_members: IndexSet<String>,
}

/// Builder for [`ClassDescriptor`].
///
/// # Example
///
/// ```
/// use heartwood::ClassDescriptor;
///
/// let base = ClassDescriptor::builder("Base").private_member("secret").build();
/// let derived = ClassDescriptor::builder("Derived")
///     .parent(&base)
///     .public_member("name")
///     .build();
///
/// assert!(derived.inherits(&base));
/// assert_eq!(derived.ancestors().len(), 1);
/// ```
pub struct ClassBuilder {
    class: ClassDescriptor,
}

impl ClassBuilder {
    /// Add a parent class. Parents are initialized in the order added.
    pub fn parent(mut self, parent: &Arc<ClassDescriptor>) -> Self {
        self.class.parents.push(Arc::clone(parent));
        self
    }

    /// Set the constructor body.
    pub fn constructor(
        mut self,
        body: impl Fn(&ObjectRef, &mut ExceptionSink) + Send + Sync + 'static,
    ) -> Self {
        self.class.constructor = Some(Arc::new(body));
        self
    }

    /// Set the destructor body.
    pub fn destructor(
        mut self,
        body: impl Fn(&ObjectRef, &mut ExceptionSink) + Send + Sync + 'static,
    ) -> Self {
        self.class.destructor = Some(Arc::new(body));
        self
    }

    /// Declare a member only visible to the class itself.
    pub fn private_member(mut self, name: impl Into<String>) -> Self {
        self.class.private_members.insert(name.into());
        self
    }

    /// Declare a public member. Once any class in a hierarchy declares
    /// public members, external access to undeclared members is rejected.
    pub fn public_member(mut self, name: impl Into<String>) -> Self {
        self.class.public_members.insert(name.into());
        self
    }

    /// Finish the class.
    pub fn build(self) -> Arc<ClassDescriptor> {
        Arc::new(self.class)
    }
}

impl ClassDescriptor {
    /// Start describing a class.
    pub fn builder(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder {
            class: ClassDescriptor {
                id: ClassId::next(),
                name: name.into(),
                parents: Vec::new(),
                constructor: None,
                destructor: None,
                private_members: IndexSet::new(),
                public_members: IndexSet::new(),
            },
        }
    }

    /// This class's identity.
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// The class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direct parents.
    pub fn parents(&self) -> &[Arc<ClassDescriptor>] {
        &self.parents
    }

    /// Every ancestor once, base classes first, excluding this class.
    pub fn ancestors(&self) -> Vec<&ClassDescriptor> {
        let mut out = self.linearize();
        out.pop();
        out
    }

    /// True if `other` is this class or one of its ancestors.
    pub fn inherits(&self, other: &ClassDescriptor) -> bool {
        self.linearize().iter().any(|c| c.id == other.id)
    }

    /// The hierarchy in initialization order: each parent's hierarchy
    /// (depth first, each class once), then this class.
    fn linearize(&self) -> Vec<&ClassDescriptor> {
        fn visit<'a>(class: &'a ClassDescriptor, out: &mut Vec<&'a ClassDescriptor>) {
            if out.iter().any(|c| c.id == class.id) {
                return;
            }
            for parent in &class.parents {
                visit(parent, out);
            }
            out.push(class);
        }
        let mut out = Vec::new();
        visit(self, &mut out);
        out
    }

    /// Run constructors base class first. Stops at the first constructor
    /// that raises and returns false.
    pub(crate) fn run_constructors(&self, obj: &ObjectRef, sink: &mut ExceptionSink) -> bool {
        let before = sink.len();
        for class in self.linearize() {
            if let Some(ctor) = &class.constructor {
                ctor(obj, sink);
                if sink.len() > before {
                    return false;
                }
            }
        }
        true
    }

    /// Run destructors most-derived first. Every destructor runs even if
    /// an earlier one raised.
    pub(crate) fn run_destructors(&self, obj: &ObjectRef, sink: &mut ExceptionSink) {
        for class in self.linearize().into_iter().rev() {
            if let Some(dtor) = &class.destructor {
                dtor(obj, sink);
            }
        }
    }

    /// Check whether `member` may be accessed with the given access level.
    pub(crate) fn check_member_access(&self, member: &str, access: Access) -> Result<(), CoreError> {
        if access == Access::Internal {
            return Ok(());
        }
        let hierarchy = self.linearize();
        if hierarchy.iter().any(|c| c.private_members.contains(member)) {
            return Err(CoreError::PrivateMember {
                member: member.to_string(),
                class: self.name.clone(),
            });
        }
        let has_public = hierarchy.iter().any(|c| !c.public_members.is_empty());
        if has_public && !hierarchy.iter().any(|c| c.public_members.contains(member)) {
            return Err(CoreError::InvalidMember {
                member: member.to_string(),
                class: self.name.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field(
                "parents",
                &self.parents.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
