//! Debug implementation for Value

use std::fmt;

use super::*;

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nothing => write!(f, "NOTHING"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{:?}", n),
            Value::Node(node) => fmt_node(node, f),
        }
    }
}

fn fmt_node(node: &NodeRef, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &node.node().body {
        NodeBody::String(s) => write!(f, "{:?}", s.read().as_str()),

        NodeBody::List(items) => {
            write!(f, "(")?;
            for (i, item) in items.read().iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:?}", item)?;
            }
            write!(f, ")")
        }

        NodeBody::Hash(map) => {
            write!(f, "{{")?;
            for (i, (k, v)) in map.read().iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:?}: {:?}", k, v)?;
            }
            write!(f, "}}")
        }

        // Members are not printed; they may refer back to this object.
        NodeBody::Object(obj) => write!(f, "<object {} {}>", obj.class_name(), node.id()),
    }
}
