use std::fmt;
use std::str::FromStr;

use crate::bytes::text_to_u16;
use crate::Error;

/// Reserved id meaning "no id" on the wire; never a valid segment.
pub const MAX_ID: u16 = 0xFFFF;

/// LWM2M path `/<object>[/<instance>[/<resource>]]`.
///
/// A resource can only be addressed through an instance; the constructors
/// make the other combination unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uri {
    object: u16,
    instance: Option<u16>,
    resource: Option<u16>,
}

impl Uri {
    pub fn object(object: u16) -> Self {
        Uri {
            object,
            instance: None,
            resource: None,
        }
    }

    pub fn instance(object: u16, instance: u16) -> Self {
        Uri {
            object,
            instance: Some(instance),
            resource: None,
        }
    }

    pub fn resource(object: u16, instance: u16, resource: u16) -> Self {
        Uri {
            object,
            instance: Some(instance),
            resource: Some(resource),
        }
    }

    /// Build from Uri-Path segments. `Ok(None)` for an empty path (the root).
    pub fn from_segments<S: AsRef<str>>(segments: &[S]) -> Result<Option<Uri>, Error> {
        let mut ids = [0u16; 3];
        if segments.len() > 3 {
            return Err(Error::InvalidUri);
        }
        for (slot, seg) in ids.iter_mut().zip(segments) {
            let id = text_to_u16(seg.as_ref().as_bytes()).ok_or(Error::InvalidUri)?;
            if id == MAX_ID {
                return Err(Error::InvalidUri);
            }
            *slot = id;
        }
        Ok(match segments.len() {
            0 => None,
            1 => Some(Uri::object(ids[0])),
            2 => Some(Uri::instance(ids[0], ids[1])),
            _ => Some(Uri::resource(ids[0], ids[1], ids[2])),
        })
    }

    pub fn object_id(&self) -> u16 {
        self.object
    }

    pub fn instance_id(&self) -> Option<u16> {
        self.instance
    }

    pub fn resource_id(&self) -> Option<u16> {
        self.resource
    }

    pub fn is_object(&self) -> bool {
        self.instance.is_none()
    }

    pub fn is_instance(&self) -> bool {
        self.instance.is_some() && self.resource.is_none()
    }

    pub fn is_resource(&self) -> bool {
        self.resource.is_some()
    }

    /// The same path with the resource segment dropped.
    pub fn parent(&self) -> Option<Uri> {
        match (self.instance, self.resource) {
            (Some(i), Some(_)) => Some(Uri::instance(self.object, i)),
            (Some(_), None) => Some(Uri::object(self.object)),
            _ => None,
        }
    }

    /// Whether `other` equals this path or lies beneath it.
    pub fn contains(&self, other: &Uri) -> bool {
        if self.object != other.object {
            return false;
        }
        if let Some(i) = self.instance {
            if other.instance != Some(i) {
                return false;
            }
        }
        if let Some(r) = self.resource {
            if other.resource != Some(r) {
                return false;
            }
        }
        true
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix('/').ok_or(Error::InvalidUri)?;
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(Error::InvalidUri);
        }
        Uri::from_segments(&segments)?.ok_or(Error::InvalidUri)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.object)?;
        if let Some(i) = self.instance {
            write!(f, "/{}", i)?;
        }
        if let Some(r) = self.resource {
            write!(f, "/{}", r)?;
        }
        Ok(())
    }
}
