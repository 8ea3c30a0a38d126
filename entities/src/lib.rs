pub mod cached_mapping;

pub mod prelude {
    pub use super::cached_mapping::Entity as CachedMapping;
}
