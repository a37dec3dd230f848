use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;

use crate::coap::ResponseCode;
use crate::data::{Data, Value};
use crate::object::{Object, ObjectResult};
use crate::uri::Uri;

/// Operations a server may perform on a user resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access(u8);

impl Access {
    pub const READ: Access = Access(1);
    pub const WRITE: Access = Access(2);
    pub const EXECUTE: Access = Access(4);

    pub fn allows(&self, other: Access) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Access {
    type Output = Access;

    fn bitor(self, rhs: Access) -> Access {
        Access(self.0 | rhs.0)
    }
}

/// Called after a server wrote a new value.
pub type WriteCallback = Box<dyn FnMut(Uri, &Value)>;

/// Called when a server executes the resource, with the execute arguments.
pub type ExecuteCallback = Box<dyn FnMut(Uri, &[u8])>;

/// A user resource handed to [`Device::add_resource`](crate::Device::add_resource).
pub struct Resource {
    pub object: u16,
    pub instance: u16,
    pub resource: u16,
    pub value: Value,
    pub access: Access,
    pub on_write: Option<WriteCallback>,
    pub on_execute: Option<ExecuteCallback>,
}

impl Resource {
    pub fn new(object: u16, instance: u16, resource: u16, value: Value, access: Access) -> Self {
        Resource {
            object,
            instance,
            resource,
            value,
            access,
            on_write: None,
            on_execute: None,
        }
    }

    pub fn on_write(mut self, f: impl FnMut(Uri, &Value) + 'static) -> Self {
        self.on_write = Some(Box::new(f));
        self
    }

    pub fn on_execute(mut self, f: impl FnMut(Uri, &[u8]) + 'static) -> Self {
        self.on_execute = Some(Box::new(f));
        self
    }

    pub fn uri(&self) -> Uri {
        Uri::resource(self.object, self.instance, self.resource)
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("uri", &self.uri())
            .field("value", &self.value)
            .field("access", &self.access)
            .finish()
    }
}

/// Convert an incoming value to the type of the value it replaces.
fn coerce(current: &Value, incoming: &Value) -> Option<Value> {
    Some(match current {
        Value::Integer(_) => Value::Integer(incoming.as_int()?),
        Value::Float(_) => Value::Float(incoming.as_float()?),
        Value::Boolean(_) => Value::Boolean(incoming.as_bool()?),
        Value::String(_) => Value::String(incoming.as_str()?.to_owned()),
        Value::Opaque(_) => Value::Opaque(incoming.as_bytes()?.to_vec()),
        Value::ObjectLink(..) => {
            let (o, i) = incoming.as_object_link()?;
            Value::ObjectLink(o, i)
        }
        _ => return None,
    })
}

/// Generic object holding user resources, one per `(instance, resource)`.
pub struct ResourceObject {
    id: u16,
    resources: BTreeMap<(u16, u16), Resource>,
}

impl ResourceObject {
    pub fn new(id: u16) -> Self {
        ResourceObject {
            id,
            resources: BTreeMap::new(),
        }
    }

    /// Add or replace a resource. It must belong to this object.
    pub fn insert(&mut self, resource: Resource) -> Result<(), crate::Error> {
        if resource.object != self.id {
            return Err(crate::Error::BadParameter("resource of another object"));
        }
        self.resources
            .insert((resource.instance, resource.resource), resource);
        Ok(())
    }

    pub fn remove(&mut self, instance: u16, resource: u16) -> Option<Resource> {
        self.resources.remove(&(instance, resource))
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn value(&self, instance: u16, resource: u16) -> Option<&Value> {
        self.resources.get(&(instance, resource)).map(|r| &r.value)
    }

    /// Set a value locally. Returns whether it changed.
    pub fn set_value(&mut self, instance: u16, resource: u16, value: Value) -> Option<bool> {
        let r = self.resources.get_mut(&(instance, resource))?;
        let changed = r.value != value;
        r.value = value;
        Some(changed)
    }

    fn instance_resources(&self, instance: u16) -> impl Iterator<Item = &Resource> {
        self.resources
            .range((instance, 0)..=(instance, u16::MAX))
            .map(|(_, r)| r)
    }
}

impl fmt::Debug for ResourceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceObject")
            .field("id", &self.id)
            .field("resources", &self.resources.len())
            .finish()
    }
}

impl Object for ResourceObject {
    fn id(&self) -> u16 {
        self.id
    }

    fn instances(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.resources.keys().map(|(i, _)| *i).collect();
        ids.dedup();
        ids
    }

    fn read(&mut self, instance: u16, data: &mut Vec<Data>) -> ObjectResult {
        if self.instance_resources(instance).next().is_none() {
            return Err(ResponseCode::NotFound);
        }
        if data.is_empty() {
            for r in self.instance_resources(instance) {
                if r.access.allows(Access::READ) {
                    data.push(Data::new(r.resource, r.value.clone()));
                }
            }
            return Ok(());
        }
        for d in data.iter_mut() {
            let r = self
                .resources
                .get(&(instance, d.id))
                .ok_or(ResponseCode::NotFound)?;
            if !r.access.allows(Access::READ) {
                return Err(ResponseCode::MethodNotAllowed);
            }
            d.value = r.value.clone();
        }
        Ok(())
    }

    fn write(&mut self, instance: u16, data: &[Data], _replace: bool) -> ObjectResult {
        // Check everything first so a rejected write changes nothing.
        let mut updates = Vec::with_capacity(data.len());
        for d in data {
            let r = self
                .resources
                .get(&(instance, d.id))
                .ok_or(ResponseCode::NotFound)?;
            if !r.access.allows(Access::WRITE) {
                return Err(ResponseCode::MethodNotAllowed);
            }
            let value = coerce(&r.value, &d.value).ok_or(ResponseCode::BadRequest)?;
            updates.push((d.id, value));
        }
        for (id, value) in updates {
            if let Some(r) = self.resources.get_mut(&(instance, id)) {
                r.value = value;
                let uri = r.uri();
                if let Some(cb) = r.on_write.as_mut() {
                    cb(uri, &r.value);
                }
            }
        }
        Ok(())
    }

    fn execute(&mut self, instance: u16, resource: u16, args: &[u8]) -> ObjectResult {
        let r = self
            .resources
            .get_mut(&(instance, resource))
            .ok_or(ResponseCode::NotFound)?;
        if !r.access.allows(Access::EXECUTE) {
            return Err(ResponseCode::MethodNotAllowed);
        }
        let uri = r.uri();
        if let Some(cb) = r.on_execute.as_mut() {
            cb(uri, args);
        }
        Ok(())
    }

    fn discover(&mut self, instance: u16, data: &mut Vec<Data>) -> ObjectResult {
        if data.is_empty() {
            if self.instance_resources(instance).next().is_none() {
                return Err(ResponseCode::NotFound);
            }
            for r in self.instance_resources(instance) {
                data.push(Data::undefined(r.resource));
            }
        }
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
