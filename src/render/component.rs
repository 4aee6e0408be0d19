// Components - resources bound to native GPU objects
//
// A component owns at most one Resource plus the backend object created
// from it. Components live in the device's arena and are addressed by
// generational handles, so a handle that outlived its component is detected
// instead of dereferenced.
//
// Lifetime rules:
// - a renderer takes a lease on every component it uses
// - a leased component cannot be destroyed
// - components created from `RendererInfo::add_resource` are owned by their
//   renderer and reclaimed by `ComponentArena::collect` once it is gone

use crate::backend::Backend;
use crate::render::resource::{Resource, ResourceType};
use std::sync::{Arc, Weak};

pub trait Component {
    fn get_resource(&self) -> Option<&Resource>;
    fn get_resource_mut(&mut self) -> Option<&mut Resource>;
    fn resource_type(&self) -> ResourceType;

    fn has_resource(&self) -> bool {
        self.get_resource().is_some()
    }
}

pub struct BufferComponent<B: Backend> {
    resource: Option<Resource>,
    native: Option<B::Buffer>,
}

impl<B: Backend> BufferComponent<B> {
    pub(crate) fn empty() -> Self {
        Self {
            resource: None,
            native: None,
        }
    }

    pub(crate) fn new(resource: Resource, native: B::Buffer) -> Self {
        Self {
            resource: Some(resource),
            native: Some(native),
        }
    }

    pub(crate) fn bind(&mut self, resource: Resource, native: B::Buffer) {
        self.resource = Some(resource);
        self.native = Some(native);
    }

    pub fn native(&self) -> Option<&B::Buffer> {
        self.native.as_ref()
    }

    pub(crate) fn parts_mut(&mut self) -> (Option<&mut Resource>, Option<&mut B::Buffer>) {
        (self.resource.as_mut(), self.native.as_mut())
    }
}

impl<B: Backend> Component for BufferComponent<B> {
    fn get_resource(&self) -> Option<&Resource> {
        self.resource.as_ref()
    }

    fn get_resource_mut(&mut self) -> Option<&mut Resource> {
        self.resource.as_mut()
    }

    fn resource_type(&self) -> ResourceType {
        ResourceType::Buffer
    }
}

pub struct ImageComponent<B: Backend> {
    resource: Option<Resource>,
    native: Option<B::Image>,
}

impl<B: Backend> ImageComponent<B> {
    pub(crate) fn empty() -> Self {
        Self {
            resource: None,
            native: None,
        }
    }

    pub(crate) fn new(resource: Resource, native: B::Image) -> Self {
        Self {
            resource: Some(resource),
            native: Some(native),
        }
    }

    pub(crate) fn bind(&mut self, resource: Resource, native: B::Image) {
        self.resource = Some(resource);
        self.native = Some(native);
    }

    pub fn native(&self) -> Option<&B::Image> {
        self.native.as_ref()
    }
}

impl<B: Backend> Component for ImageComponent<B> {
    fn get_resource(&self) -> Option<&Resource> {
        self.resource.as_ref()
    }

    fn get_resource_mut(&mut self) -> Option<&mut Resource> {
        self.resource.as_mut()
    }

    fn resource_type(&self) -> ResourceType {
        ResourceType::Image
    }
}

#[cfg(feature = "vulkan")]
pub type BufferComponentVulkan = BufferComponent<crate::backend::VulkanBackend>;
#[cfg(feature = "vulkan")]
pub type ImageComponentVulkan = ImageComponent<crate::backend::VulkanBackend>;
#[cfg(feature = "opengl")]
pub type BufferComponentOgl = BufferComponent<crate::backend::OpenGlBackend>;
#[cfg(feature = "opengl")]
pub type ImageComponentOgl = ImageComponent<crate::backend::OpenGlBackend>;

/// Either kind of component, as stored in the arena.
pub enum AnyComponent<B: Backend> {
    Buffer(BufferComponent<B>),
    Image(ImageComponent<B>),
}

impl<B: Backend> AnyComponent<B> {
    pub fn as_buffer(&self) -> Option<&BufferComponent<B>> {
        match self {
            AnyComponent::Buffer(buffer) => Some(buffer),
            AnyComponent::Image(_) => None,
        }
    }

    pub fn as_image(&self) -> Option<&ImageComponent<B>> {
        match self {
            AnyComponent::Image(image) => Some(image),
            AnyComponent::Buffer(_) => None,
        }
    }

    pub(crate) fn as_buffer_mut(&mut self) -> Option<&mut BufferComponent<B>> {
        match self {
            AnyComponent::Buffer(buffer) => Some(buffer),
            AnyComponent::Image(_) => None,
        }
    }

    pub(crate) fn as_image_mut(&mut self) -> Option<&mut ImageComponent<B>> {
        match self {
            AnyComponent::Image(image) => Some(image),
            AnyComponent::Buffer(_) => None,
        }
    }

    fn inner(&self) -> &dyn Component {
        match self {
            AnyComponent::Buffer(buffer) => buffer,
            AnyComponent::Image(image) => image,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Component {
        match self {
            AnyComponent::Buffer(buffer) => buffer,
            AnyComponent::Image(image) => image,
        }
    }
}

impl<B: Backend> Component for AnyComponent<B> {
    fn get_resource(&self) -> Option<&Resource> {
        self.inner().get_resource()
    }

    fn get_resource_mut(&mut self) -> Option<&mut Resource> {
        self.inner_mut().get_resource_mut()
    }

    fn resource_type(&self) -> ResourceType {
        self.inner().resource_type()
    }
}

// ============================================================================
// Arena
// ============================================================================

/// Generational reference to a component in a device's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentHandle {
    index: u32,
    generation: u32,
}

impl ComponentHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Keeps a component alive against `destroy_component` while held.
#[derive(Debug, Clone)]
pub(crate) struct ComponentLease {
    _token: Arc<()>,
}

struct Entry<B: Backend> {
    component: AnyComponent<B>,
    owner: Option<Weak<()>>,
    leases: Arc<()>,
}

impl<B: Backend> Entry<B> {
    fn leased(&self) -> bool {
        Arc::strong_count(&self.leases) > 1
    }

    fn orphaned(&self) -> bool {
        matches!(&self.owner, Some(owner) if owner.strong_count() == 0)
    }
}

struct Slot<B: Backend> {
    generation: u32,
    entry: Option<Entry<B>>,
}

pub struct ComponentArena<B: Backend> {
    slots: Vec<Slot<B>>,
    free: Vec<u32>,
    live: usize,
}

impl<B: Backend> Default for ComponentArena<B> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }
}

impl<B: Backend> ComponentArena<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a component. With an `owner`, the component is reclaimed by
    /// `collect` once the owner token has been dropped.
    pub(crate) fn insert(&mut self, component: AnyComponent<B>, owner: Option<Weak<()>>) -> ComponentHandle {
        let entry = Entry {
            component,
            owner,
            leases: Arc::new(()),
        };
        self.live += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return ComponentHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        ComponentHandle { index, generation: 0 }
    }

    fn entry(&self, handle: ComponentHandle) -> Option<&Entry<B>> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, handle: ComponentHandle) -> Option<&mut Entry<B>> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    pub fn contains(&self, handle: ComponentHandle) -> bool {
        self.entry(handle).is_some()
    }

    pub fn get(&self, handle: ComponentHandle) -> Option<&AnyComponent<B>> {
        self.entry(handle).map(|e| &e.component)
    }

    pub(crate) fn get_mut(&mut self, handle: ComponentHandle) -> Option<&mut AnyComponent<B>> {
        self.entry_mut(handle).map(|e| &mut e.component)
    }

    /// Panics on a stale handle.
    pub(crate) fn lease(&self, handle: ComponentHandle) -> ComponentLease {
        let entry = self
            .entry(handle)
            .unwrap_or_else(|| panic!("stale component handle {:?}", handle));
        ComponentLease {
            _token: Arc::clone(&entry.leases),
        }
    }

    pub fn is_leased(&self, handle: ComponentHandle) -> bool {
        self.entry(handle).is_some_and(|e| e.leased())
    }

    /// Remove a component and hand it back.
    ///
    /// Panics on a stale handle or while a renderer still uses the component.
    pub(crate) fn remove(&mut self, handle: ComponentHandle) -> AnyComponent<B> {
        let slot = match self.slots.get_mut(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation => slot,
            _ => panic!("stale component handle {:?}", handle),
        };
        if slot.entry.as_ref().is_some_and(|e| e.leased()) {
            panic!("component {:?} destroyed while a renderer still uses it", handle);
        }
        let Some(entry) = slot.entry.take() else {
            panic!("stale component handle {:?}", handle);
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        entry.component
    }

    /// Reclaim renderer-owned components whose renderer is gone and that no
    /// other renderer leases. Returns how many were freed.
    pub(crate) fn collect(&mut self) -> usize {
        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let reclaim = slot
                .entry
                .as_ref()
                .is_some_and(|e| e.orphaned() && !e.leased());
            if reclaim {
                slot.entry = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                freed += 1;
            }
        }
        self.live -= freed;
        freed
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::render::resource::ResourceAccess;

    type Arena = ComponentArena<HeadlessBackend>;

    fn empty_buffer() -> AnyComponent<HeadlessBackend> {
        AnyComponent::Buffer(BufferComponent::empty())
    }

    #[test]
    fn empty_component_has_no_resource() {
        let component = empty_buffer();
        assert!(!component.has_resource());
        assert_eq!(component.resource_type(), ResourceType::Buffer);
    }

    #[test]
    fn stale_handles_are_rejected() {
        let mut arena = Arena::new();
        let first = arena.insert(empty_buffer(), None);
        arena.remove(first);
        assert!(!arena.contains(first));

        let second = arena.insert(empty_buffer(), None);
        assert_eq!(second.index(), first.index());
        assert_ne!(second.generation(), first.generation());
        assert!(arena.get(first).is_none());
        assert!(arena.get(second).is_some());
    }

    #[test]
    #[should_panic(expected = "stale component handle")]
    fn double_remove_panics() {
        let mut arena = Arena::new();
        let handle = arena.insert(empty_buffer(), None);
        arena.remove(handle);
        arena.remove(handle);
    }

    #[test]
    #[should_panic(expected = "still uses it")]
    fn leased_component_cannot_be_removed() {
        let mut arena = Arena::new();
        let handle = arena.insert(empty_buffer(), None);
        let _lease = arena.lease(handle);
        arena.remove(handle);
    }

    #[test]
    fn lease_released_on_drop() {
        let mut arena = Arena::new();
        let handle = arena.insert(empty_buffer(), None);
        let lease = arena.lease(handle);
        assert!(arena.is_leased(handle));
        drop(lease);
        assert!(!arena.is_leased(handle));
        arena.remove(handle);
        assert!(arena.is_empty());
    }

    #[test]
    fn collect_reclaims_orphans_only() {
        let mut arena = Arena::new();
        let owner = Arc::new(());
        let owned = arena.insert(empty_buffer(), Some(Arc::downgrade(&owner)));
        let shared = arena.insert(empty_buffer(), Some(Arc::downgrade(&owner)));
        let free_standing = arena.insert(empty_buffer(), None);

        assert_eq!(arena.collect(), 0);

        let other_renderer = arena.lease(shared);
        drop(owner);
        assert_eq!(arena.collect(), 1);
        assert!(!arena.contains(owned));
        assert!(arena.contains(shared));
        assert!(arena.contains(free_standing));

        drop(other_renderer);
        assert_eq!(arena.collect(), 1);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn binding_makes_has_resource_true() {
        let mut component = BufferComponent::<HeadlessBackend>::empty();
        assert!(!component.has_resource());
        let resource = Resource::from_bytes(vec![1, 2, 3, 4], ResourceAccess::StaticFixed);
        let mut backend = HeadlessBackend::new();
        let staged = crate::render::upload::StagedResource::stage(&resource, 1);
        let native = backend.create_buffer(&resource, &staged).unwrap();
        component.bind(resource, native);
        assert!(component.has_resource());
        assert_eq!(component.get_resource().map(|r| r.data().to_vec()), Some(vec![1, 2, 3, 4]));
    }
}
