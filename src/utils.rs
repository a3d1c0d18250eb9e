#[cfg(feature = "mimalloc")]
mod mimalloc {
    use mimalloc::MiMalloc;

    #[global_allocator]
    static GLOBAL: MiMalloc = MiMalloc;
}

/// Promotes a process-lifetime value to `'static`.
pub fn leak<T>(inner: T) -> &'static T {
    Box::leak(Box::new(inner))
}
