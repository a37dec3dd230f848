//! Object layer: the capability set every LWM2M object exposes and the
//! id-ordered registry the client dispatches into.

use std::any::Any;
use std::collections::BTreeMap;

use crate::coap::ResponseCode;
use crate::data::{Data, Value};
use crate::Error;

pub const SECURITY_OBJECT_ID: u16 = 0;
pub const SERVER_OBJECT_ID: u16 = 1;
pub const DEVICE_OBJECT_ID: u16 = 3;

/// Outcome of an object operation. The error is the CoAP code to answer with.
pub type ObjectResult<T = ()> = Result<T, ResponseCode>;

/// One LWM2M object and its instances.
///
/// Only `read` is mandatory; every other operation answers 4.05 Method Not
/// Allowed unless the object overrides it.
pub trait Object {
    fn id(&self) -> u16;

    /// Instance ids, ascending.
    fn instances(&self) -> Vec<u16>;

    /// Fill `data` for `instance`. An empty `data` asks for every readable
    /// resource, otherwise only the listed ids (values `Undefined`) are filled.
    fn read(&mut self, instance: u16, data: &mut Vec<Data>) -> ObjectResult;

    /// Write resources. `replace` is set for PUT on an instance, which
    /// replaces the whole instance instead of updating it.
    fn write(&mut self, instance: u16, data: &[Data], replace: bool) -> ObjectResult {
        let _ = (instance, data, replace);
        Err(ResponseCode::MethodNotAllowed)
    }

    fn execute(&mut self, instance: u16, resource: u16, args: &[u8]) -> ObjectResult {
        let _ = (instance, resource, args);
        Err(ResponseCode::MethodNotAllowed)
    }

    fn create(&mut self, instance: u16, data: &[Data]) -> ObjectResult {
        let _ = (instance, data);
        Err(ResponseCode::MethodNotAllowed)
    }

    fn delete(&mut self, instance: u16) -> ObjectResult {
        let _ = instance;
        Err(ResponseCode::MethodNotAllowed)
    }

    /// Resource ids present in `instance`. Defaults to the ids `read` reports
    /// plus whatever `executable` lists.
    fn discover(&mut self, instance: u16, data: &mut Vec<Data>) -> ObjectResult {
        if data.is_empty() {
            self.read(instance, data)?;
            for id in self.executable(instance) {
                if !data.iter().any(|d| d.id == id) {
                    data.push(Data::undefined(id));
                }
            }
            data.sort_by_key(|d| d.id);
        }
        Ok(())
    }

    /// Executable resources of `instance`, which `read` does not report.
    fn executable(&self, instance: u16) -> Vec<u16> {
        let _ = instance;
        Vec::new()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Registered objects keyed by id.
#[derive(Default)]
pub struct ObjectRegistry {
    objects: BTreeMap<u16, Box<dyn Object>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, object: Box<dyn Object>) -> Result<(), Error> {
        let id = object.id();
        if self.objects.contains_key(&id) {
            return Err(Error::AlreadyRegistered);
        }
        self.objects.insert(id, object);
        Ok(())
    }

    pub fn remove(&mut self, id: u16) -> Option<Box<dyn Object>> {
        self.objects.remove(&id)
    }

    pub fn get_mut(&mut self, id: u16) -> Option<&mut (dyn Object + 'static)> {
        self.objects.get_mut(&id).map(|o| o.as_mut())
    }

    /// Typed access to a registered object.
    pub fn downcast_mut<T: Object + 'static>(&mut self, id: u16) -> Option<&mut T> {
        self.get_mut(id)?.as_any_mut().downcast_mut::<T>()
    }

    pub fn contains(&self, id: u16) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn has_instance(&self, id: u16, instance: u16) -> bool {
        self.objects
            .get(&id)
            .map(|o| o.instances().contains(&instance))
            .unwrap_or(false)
    }

    pub fn ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.objects.keys().copied()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Object>> {
        self.objects.values_mut()
    }

    /// `(object, instance)` pairs in id order, skipping object `skip`.
    pub fn instance_pairs(&self, skip: u16) -> Vec<(u16, Option<u16>)> {
        let mut out = Vec::new();
        for (&id, obj) in &self.objects {
            if id == skip {
                continue;
            }
            let instances = obj.instances();
            if instances.is_empty() {
                out.push((id, None));
            }
            for i in instances {
                out.push((id, Some(i)));
            }
        }
        out
    }

    /// Read one resource value, used by the client to consult the Security
    /// and Server objects.
    pub fn read_value(&mut self, object: u16, instance: u16, resource: u16) -> Option<Value> {
        let obj = self.objects.get_mut(&object)?;
        let mut data = vec![Data::undefined(resource)];
        obj.read(instance, &mut data).ok()?;
        data.pop()
            .map(|d| d.value)
            .filter(|v| *v != Value::Undefined)
    }
}

impl std::fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("objects", &self.objects.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Resolve the values a `read` should fill: every id in `all` when `data` is
/// empty, otherwise the ids already in `data`.
pub(crate) fn requested_ids(data: &[Data], all: &[u16]) -> Vec<u16> {
    if data.is_empty() {
        all.to_vec()
    } else {
        data.iter().map(|d| d.id).collect()
    }
}

/// Lowest instance id not in `used`.
pub(crate) fn free_instance_id(used: &[u16]) -> Option<u16> {
    (0..crate::uri::MAX_ID).find(|id| !used.contains(id))
}
