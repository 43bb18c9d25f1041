// The constructor expands inside a generated module, so it uses absolute paths.
bnorm_backend_tests::define_backend_tests!(cpu_backend, || std::sync::Arc::new(
    bnorm_backend_cpu::CpuBatchNormBackend::new()
));
