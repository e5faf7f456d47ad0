//! Publisher service targets named as `package/class`.

use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

/// A bindable publisher service component.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublisherTarget {
    pub package: String,
    pub class: String,
}

impl PublisherTarget {
    /// Canonical `package/class` form, with the class fully qualified.
    pub fn flatten(&self) -> String {
        format!("{}/{}", self.package, self.class)
    }
}

impl Display for PublisherTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.flatten())
    }
}

pub enum TargetError {
    MissingSeparator(String),
    EmptyPackage(String),
    EmptyClass(String),
}

impl Debug for TargetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TargetError::MissingSeparator(name) => write!(f, "MissingSeparator({name:?})"),
            TargetError::EmptyPackage(name) => write!(f, "EmptyPackage({name:?})"),
            TargetError::EmptyClass(name) => write!(f, "EmptyClass({name:?})"),
        }
    }
}

impl Display for TargetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TargetError::MissingSeparator(name) => {
                write!(f, "Target '{name}' is not of the form package/class")
            }
            TargetError::EmptyPackage(name) => write!(f, "Target '{name}' has an empty package"),
            TargetError::EmptyClass(name) => write!(f, "Target '{name}' has an empty class"),
        }
    }
}

impl Error for TargetError {}

impl FromStr for PublisherTarget {
    type Err = TargetError;

    /// Parses `package/class`. A class starting with `.` is relative to the package.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let Some((package, class)) = name.split_once('/') else {
            return Err(TargetError::MissingSeparator(name.to_string()));
        };
        let package = package.trim();
        let class = class.trim();
        if package.is_empty() {
            return Err(TargetError::EmptyPackage(name.to_string()));
        }
        if class.is_empty() || class == "." {
            return Err(TargetError::EmptyClass(name.to_string()));
        }

        let class = if class.starts_with('.') {
            format!("{package}{class}")
        } else {
            class.to_string()
        };

        Ok(PublisherTarget {
            package: package.to_string(),
            class,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{PublisherTarget, TargetError};

    #[test]
    fn relative_class_is_qualified_with_package() {
        let target: PublisherTarget = "com.example.app/.Publisher".parse().expect("valid target");

        assert_eq!(target.package, "com.example.app");
        assert_eq!(target.class, "com.example.app.Publisher");
        assert_eq!(target.flatten(), "com.example.app/com.example.app.Publisher");
    }

    #[test]
    fn absolute_class_is_kept() {
        let target: PublisherTarget = "com.example.app/org.other.Publisher"
            .parse()
            .expect("valid target");

        assert_eq!(target.class, "org.other.Publisher");
    }

    #[test]
    fn malformed_names_are_rejected() {
        assert!(matches!(
            "no-separator".parse::<PublisherTarget>(),
            Err(TargetError::MissingSeparator(_))
        ));
        assert!(matches!(
            "/.Publisher".parse::<PublisherTarget>(),
            Err(TargetError::EmptyPackage(_))
        ));
        assert!(matches!(
            "com.example.app/".parse::<PublisherTarget>(),
            Err(TargetError::EmptyClass(_))
        ));
    }
}
