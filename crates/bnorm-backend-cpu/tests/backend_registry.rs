use bnorm::arch::HOST_ARCH;
use bnorm::backend::registry::{
    create_backend, get_typed_backend, has_backend, list_backends, ErasedBackend,
};
use bnorm::BatchNormBackend;
use bnorm_backend_cpu::CpuBatchNormBackend;

#[test]
fn test_backend_registry() {
    // Ensure backends are registered (auto-registration via .init_array)
    bnorm_backend_cpu::register_cpu_backend();

    let backends = list_backends();
    println!("Available backends: {:?}", backends);

    assert!(has_backend("cpu"), "cpu backend not registered");
    assert!(has_backend("host"), "host alias not registered");
    assert!(backends.contains(&"cpu".to_string()));

    let cpu_backend = create_backend("host").expect("failed to create host backend");
    assert_eq!(cpu_backend.backend_name(), "cpu");
    assert_eq!(cpu_backend.device_arch(), HOST_ARCH);

    let typed = get_typed_backend::<CpuBatchNormBackend>(cpu_backend.as_ref())
        .expect("registry entry wraps the cpu backend");
    assert_eq!(typed.device_name(), cpu_backend.device_name());

    let cloned = cpu_backend.clone_backend();
    assert_eq!(cloned.device_name(), cpu_backend.device_name());

    assert!(!has_backend("nonexistent"));
    assert!(create_backend("nonexistent").is_none());
}
