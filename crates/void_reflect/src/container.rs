//! Container adapters
//!
//! A container class exposes its elements through a [`ContainerAdapter`]
//! instead of a field list. Elements are either values of one class
//! (`Vec<T>`) or boxed objects of any class derived from a declared one
//! (`Vec<Box<dyn Reflected>>`).

use core::marker::PhantomData;

use void_core::ClassId;

use crate::class::{downcast_box, Class, Reflected};
use crate::registry::GenericSchemaFn;

/// Element access for a reflected container class
pub trait ContainerAdapter: Send + Sync {
    /// Declared class of the elements
    fn element_class(&self) -> ClassId;

    /// Whether elements are boxed polymorphic objects
    fn element_is_pointer(&self) -> bool;

    /// Number of elements
    fn size(&self, container: &dyn Reflected) -> usize;

    /// Whether element addresses survive insertions
    fn is_stable_elements(&self) -> bool;

    /// Element by position
    fn element<'a>(&self, container: &'a dyn Reflected, index: usize) -> Option<&'a dyn Reflected>;

    /// Element by position (mutable)
    fn element_mut<'a>(
        &self,
        container: &'a mut dyn Reflected,
        index: usize,
    ) -> Option<&'a mut dyn Reflected>;

    /// Append a default element and return it; `None` for pointer containers
    fn reserve_element<'a>(&self, container: &'a mut dyn Reflected) -> Option<&'a mut dyn Reflected>;

    /// Append an element, returning it back if the class does not fit
    fn store_element(
        &self,
        container: &mut dyn Reflected,
        element: Box<dyn Reflected>,
    ) -> Result<(), Box<dyn Reflected>>;

    /// Replace the element at `index`
    fn replace_element(
        &self,
        container: &mut dyn Reflected,
        index: usize,
        element: Box<dyn Reflected>,
    ) -> Result<(), Box<dyn Reflected>>;

    /// Remove the element at `index`
    fn remove_element(&self, container: &mut dyn Reflected, index: usize) -> bool;

    /// Remove every element
    fn clear_elements(&self, container: &mut dyn Reflected);

    /// Schema generator of the element class when it is a generic specialization
    fn element_generic(&self) -> Option<GenericSchemaFn> {
        None
    }

    /// Visit elements in order until the callback returns `false`
    fn enum_elements<'a>(
        &self,
        container: &'a dyn Reflected,
        callback: &mut dyn FnMut(usize, &'a dyn Reflected) -> bool,
    ) {
        for index in 0..self.size(container) {
            match self.element(container, index) {
                Some(element) if !callback(index, element) => break,
                _ => {}
            }
        }
    }
}

/// Adapter for `Vec<T>` with value elements
pub struct VecAdapter<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> VecAdapter<T> {
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for VecAdapter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Class> ContainerAdapter for VecAdapter<T> {
    fn element_class(&self) -> ClassId {
        T::CLASS_ID
    }

    fn element_is_pointer(&self) -> bool {
        false
    }

    fn element_generic(&self) -> Option<GenericSchemaFn> {
        T::generic_schema().map(|_| T::generic_schema as GenericSchemaFn)
    }

    fn size(&self, container: &dyn Reflected) -> usize {
        container.downcast_ref::<Vec<T>>().map_or(0, Vec::len)
    }

    fn is_stable_elements(&self) -> bool {
        false
    }

    fn element<'a>(&self, container: &'a dyn Reflected, index: usize) -> Option<&'a dyn Reflected> {
        container
            .downcast_ref::<Vec<T>>()
            .and_then(|v| v.get(index))
            .map(|e| e as &dyn Reflected)
    }

    fn element_mut<'a>(
        &self,
        container: &'a mut dyn Reflected,
        index: usize,
    ) -> Option<&'a mut dyn Reflected> {
        container
            .downcast_mut::<Vec<T>>()
            .and_then(|v| v.get_mut(index))
            .map(|e| e as &mut dyn Reflected)
    }

    fn reserve_element<'a>(&self, container: &'a mut dyn Reflected) -> Option<&'a mut dyn Reflected> {
        let vec = container.downcast_mut::<Vec<T>>()?;
        vec.push(T::default());
        vec.last_mut().map(|e| e as &mut dyn Reflected)
    }

    fn store_element(
        &self,
        container: &mut dyn Reflected,
        element: Box<dyn Reflected>,
    ) -> Result<(), Box<dyn Reflected>> {
        let Some(vec) = container.downcast_mut::<Vec<T>>() else {
            return Err(element);
        };
        vec.push(*downcast_box::<T>(element)?);
        Ok(())
    }

    fn replace_element(
        &self,
        container: &mut dyn Reflected,
        index: usize,
        element: Box<dyn Reflected>,
    ) -> Result<(), Box<dyn Reflected>> {
        let Some(slot) = container
            .downcast_mut::<Vec<T>>()
            .and_then(|v| v.get_mut(index))
        else {
            return Err(element);
        };
        *slot = *downcast_box::<T>(element)?;
        Ok(())
    }

    fn remove_element(&self, container: &mut dyn Reflected, index: usize) -> bool {
        match container.downcast_mut::<Vec<T>>() {
            Some(vec) if index < vec.len() => {
                vec.remove(index);
                true
            }
            _ => false,
        }
    }

    fn clear_elements(&self, container: &mut dyn Reflected) {
        if let Some(vec) = container.downcast_mut::<Vec<T>>() {
            vec.clear();
        }
    }
}

/// Adapter for `Vec<Box<dyn Reflected>>` with polymorphic elements
pub struct PointerVecAdapter {
    declared: ClassId,
}

type PointerVec = Vec<Box<dyn Reflected>>;

impl PointerVecAdapter {
    pub const fn new(declared: ClassId) -> Self {
        Self { declared }
    }
}

impl ContainerAdapter for PointerVecAdapter {
    fn element_class(&self) -> ClassId {
        self.declared
    }

    fn element_is_pointer(&self) -> bool {
        true
    }

    fn size(&self, container: &dyn Reflected) -> usize {
        container.downcast_ref::<PointerVec>().map_or(0, Vec::len)
    }

    fn is_stable_elements(&self) -> bool {
        // Boxed elements keep their address when the vector grows
        true
    }

    fn element<'a>(&self, container: &'a dyn Reflected, index: usize) -> Option<&'a dyn Reflected> {
        container
            .downcast_ref::<PointerVec>()
            .and_then(|v| v.get(index))
            .map(|e| &**e)
    }

    fn element_mut<'a>(
        &self,
        container: &'a mut dyn Reflected,
        index: usize,
    ) -> Option<&'a mut dyn Reflected> {
        match container.downcast_mut::<PointerVec>().and_then(|v| v.get_mut(index)) {
            Some(element) => Some(&mut **element),
            None => None,
        }
    }

    fn reserve_element<'a>(&self, _container: &'a mut dyn Reflected) -> Option<&'a mut dyn Reflected> {
        None
    }

    fn store_element(
        &self,
        container: &mut dyn Reflected,
        element: Box<dyn Reflected>,
    ) -> Result<(), Box<dyn Reflected>> {
        match container.downcast_mut::<PointerVec>() {
            Some(vec) => {
                vec.push(element);
                Ok(())
            }
            None => Err(element),
        }
    }

    fn replace_element(
        &self,
        container: &mut dyn Reflected,
        index: usize,
        element: Box<dyn Reflected>,
    ) -> Result<(), Box<dyn Reflected>> {
        match container.downcast_mut::<PointerVec>().and_then(|v| v.get_mut(index)) {
            Some(slot) => {
                *slot = element;
                Ok(())
            }
            None => Err(element),
        }
    }

    fn remove_element(&self, container: &mut dyn Reflected, index: usize) -> bool {
        match container.downcast_mut::<PointerVec>() {
            Some(vec) if index < vec.len() => {
                vec.remove(index);
                true
            }
            _ => false,
        }
    }

    fn clear_elements(&self, container: &mut dyn Reflected) {
        if let Some(vec) = container.downcast_mut::<PointerVec>() {
            vec.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_adapter() {
        let adapter = VecAdapter::<u32>::new();
        let mut values: Vec<u32> = vec![1, 2];

        assert_eq!(adapter.size(&values), 2);
        if let Some(slot) = adapter
            .reserve_element(&mut values)
            .and_then(|e| e.downcast_mut::<u32>())
        {
            *slot = 3;
        }
        assert!(adapter.store_element(&mut values, Box::new(4u32)).is_ok());
        assert!(adapter.store_element(&mut values, Box::new(5u64)).is_err());
        assert_eq!(values, [1, 2, 3, 4]);

        assert!(adapter.remove_element(&mut values, 0));
        assert!(!adapter.remove_element(&mut values, 10));
        assert_eq!(values, [2, 3, 4]);

        let mut seen = Vec::new();
        adapter.enum_elements(&values, &mut |i, e| {
            seen.push((i, *e.downcast_ref::<u32>().unwrap()));
            i < 1
        });
        assert_eq!(seen, [(0, 2), (1, 3)]);
    }

    #[test]
    fn test_pointer_vec_adapter() {
        let adapter = PointerVecAdapter::new(crate::ANY_CLASS_ID);
        let mut values: Vec<Box<dyn Reflected>> = Vec::new();

        assert!(adapter.reserve_element(&mut values).is_none());
        assert!(adapter.store_element(&mut values, Box::new(1u8)).is_ok());
        assert!(adapter.store_element(&mut values, Box::new(String::from("x"))).is_ok());
        assert_eq!(adapter.size(&values), 2);
        assert!(adapter.element(&values, 1).unwrap().is::<String>());

        assert!(adapter.replace_element(&mut values, 0, Box::new(2u16)).is_ok());
        assert!(values[0].is::<u16>());

        adapter.clear_elements(&mut values);
        assert!(values.is_empty());
    }
}
