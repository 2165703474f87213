use core::fmt::Display;

use serde::{Deserialize, Serialize};

/// Operations that don't change the semantics of the kernel.
///
/// Can be safely removed or ignored without changing the kernel result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NonSemantic {
    Comment { content: String },
}

impl Display for NonSemantic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            NonSemantic::Comment { content } => write!(f, "// {content}"),
        }
    }
}

pub fn fmt_vararg(args: &[impl Display]) -> String {
    args.iter()
        .map(|arg| arg.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
