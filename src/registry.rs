use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use tracing::debug;

use crate::{
    registration::{Capabilities, Construction, Lifetime, Registration, RegistrationId},
    types::{TypeKey, TypeRef},
};

/// Parameters of [`ServiceRegistry::add`]
#[derive(Debug, Clone, PartialEq)]
pub struct NewRegistration {
    pub service_type: TypeRef,
    pub lifetime: Lifetime,
    pub implementation_type: Option<TypeRef>,
    pub key: Option<Arc<str>>,
    pub construction: Construction,
    pub members: Option<Vec<RegistrationId>>,
    pub capabilities: Capabilities,
}

impl NewRegistration {
    #[must_use]
    pub fn new(service_type: TypeRef, lifetime: Lifetime) -> Self {
        Self {
            service_type,
            lifetime,
            implementation_type: None,
            key: None,
            construction: Construction::Constructor,
            members: None,
            capabilities: Capabilities::default(),
        }
    }
}

/// Result of selecting a registration by type and key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Single(RegistrationId),
    Ambiguous(Vec<RegistrationId>),
    None,
}

/// Append-only store of registrations grouped by service type.
///
/// Registrations are never removed and never mutated after insertion,
/// except that members may be appended to a synthesized collection aggregate.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    registrations: Vec<Registration>,
    by_type: BTreeMap<TypeKey, Vec<RegistrationId>>,
    aggregates: BTreeMap<(TypeKey, Option<Arc<str>>), RegistrationId>,
}

impl ServiceRegistry {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a registration. Its ordinal is the count of same-type registrations
    /// that are not open-generic placeholders.
    pub fn add(
        &mut self,
        NewRegistration {
            service_type,
            lifetime,
            implementation_type,
            key,
            construction,
            members,
            capabilities,
        }: NewRegistration,
    ) -> RegistrationId {
        let id = RegistrationId(self.registrations.len());
        let type_key = service_type.key();
        let entries = self.by_type.entry(type_key).or_default();
        let ordinal = entries
            .iter()
            .filter(|entry| !self.registrations[entry.0].is_open_generic())
            .count();

        debug!(%service_type, ?key, %lifetime, ordinal, "Registration added");

        entries.push(id);
        self.registrations.push(Registration {
            id,
            service_type,
            implementation_type,
            lifetime,
            key,
            construction,
            members,
            ordinal,
            is_disposable: capabilities.disposable,
            is_async_disposable: capabilities.async_disposable,
        });
        id
    }

    /// All registrations for a type in insertion order
    #[must_use]
    pub fn lookup(&self, ty: &TypeRef) -> &[RegistrationId] {
        self.lookup_key(&ty.key())
    }

    #[must_use]
    pub fn lookup_key(&self, key: &TypeKey) -> &[RegistrationId] {
        self.by_type.get(key).map_or(&[], Vec::as_slice)
    }

    /// Selects the registration for `ty` whose key equals `key` (`None` means unkeyed)
    #[must_use]
    pub fn select(&self, ty: &TypeRef, key: Option<&str>) -> Selection {
        let mut matches = self
            .lookup(ty)
            .iter()
            .copied()
            .filter(|id| self.registrations[id.0].matches_key(key))
            .collect::<Vec<_>>();

        match matches.len() {
            0 => Selection::None,
            1 => Selection::Single(matches.remove(0)),
            _ => Selection::Ambiguous(matches),
        }
    }

    /// # Panics
    /// Panics if the id belongs to another registry
    #[inline]
    #[must_use]
    pub fn get(&self, id: RegistrationId) -> &Registration {
        &self.registrations[id.0]
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.registrations.iter()
    }

    /// Registrations grouped by service type
    #[inline]
    pub fn groups(&self) -> impl Iterator<Item = (&TypeKey, &[RegistrationId])> {
        self.by_type.iter().map(|(key, ids)| (key, ids.as_slice()))
    }

    /// Chases one alias level: prefers an identically-keyed registration of the implementation type
    #[must_use]
    pub fn concretize(&self, id: RegistrationId) -> RegistrationId {
        let registration = self.get(id);
        match &registration.implementation_type {
            Some(implementation) if *implementation != registration.service_type => {
                match self.select(implementation, registration.key.as_deref()) {
                    Selection::Single(concrete) if !self.get(concrete).is_aggregate() => concrete,
                    Selection::Single(_) | Selection::Ambiguous(_) | Selection::None => id,
                }
            }
            _ => id,
        }
    }

    #[must_use]
    pub fn aggregate(&self, elem: &TypeRef, key: Option<&str>) -> Option<RegistrationId> {
        let key: Option<Arc<str>> = key.map(Into::into);
        self.aggregates.get(&(elem.key(), key)).copied()
    }

    /// Records `id` as the aggregate of `elem` and indexes it under every collection shape,
    /// so lookups for any shape return the one aggregate
    pub(crate) fn index_aggregate(&mut self, elem: &TypeRef, key: Option<Arc<str>>, id: RegistrationId, shapes: &[TypeRef]) {
        let service_key = self.registrations[id.0].service_type.key();
        for shape in shapes {
            let shape_key = shape.key();
            if shape_key != service_key {
                self.by_type.entry(shape_key).or_default().push(id);
            }
        }
        self.aggregates.insert((elem.key(), key), id);
    }

    /// Appends a member to an aggregate, ignoring duplicates
    pub(crate) fn push_member(&mut self, aggregate: RegistrationId, member: RegistrationId) -> bool {
        let Some(members) = self.registrations[aggregate.0].members.as_mut() else {
            return false;
        };
        if members.contains(&member) {
            return false;
        }
        members.push(member);
        debug!(?aggregate, ?member, "Member appended to aggregate");
        true
    }
}
