use num_complex::Complex32;
use oceanfft::api::{
    download_grid, upload_grid, BufferDescriptor, BufferFormat, BufferHandle, BufferSlot,
    ComputeBackend, ScalarSlot, ScalarValue, HORIZONTAL_STEP_KERNEL, PERMUTE_KERNEL,
    VERTICAL_STEP_KERNEL,
};
use oceanfft::host::HostEvent;
use oceanfft::{
    BufferRole, HostBackend, HostProgram, Ifft, IfftConfig, IfftError, Normalization, PassRoles,
    TwiddleTable,
};
use rustfft::FftPlanner;
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn spatial_field(size: usize) -> Vec<Complex32> {
    let mut data = Vec::with_capacity(size * size);
    for y in 0..size {
        for x in 0..size {
            let re = ((x * 13 + y * 7) % 101) as f32 * 0.03125 - 1.5;
            let im = ((x * 5 + y * 11) % 37) as f32 * 0.0625 - 1.0;
            data.push(Complex32::new(re, im));
        }
    }
    data
}

fn transpose(data: &[Complex32], size: usize) -> Vec<Complex32> {
    let mut out = vec![Complex32::new(0.0, 0.0); data.len()];
    for y in 0..size {
        for x in 0..size {
            out[x * size + y] = data[y * size + x];
        }
    }
    out
}

/// Unnormalized forward 2D FFT, row-major.
fn fft2(data: &[Complex32], size: usize) -> Vec<Complex32> {
    let fft = FftPlanner::<f32>::new().plan_fft_forward(size);
    let mut rows = data.to_vec();
    fft.process(&mut rows);
    let mut cols = transpose(&rows, size);
    fft.process(&mut cols);
    transpose(&cols, size)
}

/// Move DC from `(0, 0)` to `(N/2, N/2)`.
fn center_spectrum(spectrum: &[Complex32], size: usize) -> Vec<Complex32> {
    let half = size / 2;
    let mut centred = vec![Complex32::new(0.0, 0.0); spectrum.len()];
    for n in 0..size {
        for m in 0..size {
            centred[n * size + m] = spectrum[((n + half) % size) * size + (m + half) % size];
        }
    }
    centred
}

fn new_grid<B: ComputeBackend>(backend: &B, size: u32, data: &[Complex32]) -> BufferHandle {
    let grid = backend
        .create_buffer(&BufferDescriptor::complex_grid("spectrum", size))
        .expect("grid");
    upload_grid(backend, &grid, data).expect("upload");
    grid
}

fn assert_close(got: &[Complex32], want: &[Complex32], tol: f32) {
    assert_eq!(got.len(), want.len());
    for (idx, (g, w)) in got.iter().zip(want.iter()).enumerate() {
        let diff = (g - w).norm();
        assert!(diff <= tol, "cell {idx}: got {g:?}, want {w:?} (diff {diff})");
    }
}

#[test]
fn round_trip_recovers_spatial_field() {
    init_logging();
    for size in [2u32, 4, 8, 16, 32, 64] {
        let n = size as usize;
        let field = spatial_field(n);
        let spectrum = center_spectrum(&fft2(&field, n), n);

        let backend = HostBackend::default();
        let grid = new_grid(&backend, size, &spectrum);
        let config = IfftConfig::default().with_normalization(Normalization::InverseSquare);
        let mut ifft = Ifft::with_config(&backend, size, config).expect("ifft");
        ifft.transform(&grid).expect("transform");

        let out = download_grid(&backend, &grid).expect("download");
        assert_close(&out, &field, 1e-3);
    }
}

#[test]
fn unnormalized_output_gains_n_squared() {
    init_logging();
    let size = 16u32;
    let n = size as usize;
    let field = spatial_field(n);
    let spectrum = center_spectrum(&fft2(&field, n), n);

    let backend = HostBackend::default();
    let grid = new_grid(&backend, size, &spectrum);
    let mut ifft = Ifft::new(&backend, size).expect("ifft");
    ifft.transform(&grid).expect("transform");

    let out = download_grid(&backend, &grid).expect("download");
    let scaled: Vec<Complex32> = field.iter().map(|c| *c * (n * n) as f32).collect();
    assert_close(&out, &scaled, 1e-4 * (n * n) as f32);
}

#[test]
fn centred_impulse_yields_flat_field() {
    init_logging();
    let size = 32u32;
    let n = size as usize;
    let mut spectrum = vec![Complex32::new(0.0, 0.0); n * n];
    spectrum[(n / 2) * n + n / 2] = Complex32::new(1.0, 0.0);

    let backend = HostBackend::default();
    let grid = new_grid(&backend, size, &spectrum);
    let mut ifft = Ifft::new(&backend, size).expect("ifft");
    ifft.transform(&grid).expect("transform");

    let out = download_grid(&backend, &grid).expect("download");
    assert_close(&out, &vec![Complex32::new(1.0, 0.0); n * n], 1e-5);
}

#[test]
fn off_centre_impulse_has_unit_magnitude() {
    init_logging();
    let size = 16u32;
    let n = size as usize;
    let mut spectrum = vec![Complex32::new(0.0, 0.0); n * n];
    // bin (x = 1, y = 3)
    spectrum[3 * n + 1] = Complex32::new(1.0, 0.0);

    let backend = HostBackend::default();
    let grid = new_grid(&backend, size, &spectrum);
    let mut ifft = Ifft::new(&backend, size).expect("ifft");
    ifft.transform(&grid).expect("transform");

    let out = download_grid(&backend, &grid).expect("download");
    for (idx, cell) in out.iter().enumerate() {
        assert!(
            (cell.norm() - 1.0).abs() <= 1e-5,
            "cell {idx}: |{cell:?}| != 1"
        );
    }
    // not the flat field of the DC bin
    assert!((out[1] - out[0]).norm() > 1e-3);
}

#[test]
fn local_group_size_does_not_change_result() {
    init_logging();
    let size = 16u32;
    let field = spatial_field(size as usize);
    let mut outputs = Vec::new();
    for group in [1u32, 2, 4, 8, 16] {
        let backend = HostBackend::ifft(group);
        let grid = new_grid(&backend, size, &field);
        let config = IfftConfig::default().with_local_group_size(group);
        let mut ifft = Ifft::with_config(&backend, size, config).expect("ifft");
        ifft.transform(&grid).expect("transform");
        outputs.push(download_grid(&backend, &grid).expect("download"));
    }
    for out in &outputs[1..] {
        assert_eq!(out, &outputs[0]);
    }
}

#[test]
fn device_table_matches_host_table() {
    init_logging();
    let backend = HostBackend::default();
    let first = Ifft::new(&backend, 64).expect("ifft");
    let second = Ifft::new(&backend, 64).expect("ifft");

    let table = first.twiddle_table().expect("table");
    assert_eq!(table, TwiddleTable::compute(64).expect("host table"));
    assert_eq!(table.stages(), 6);

    let again = second.twiddle_table().expect("table");
    let bits = |t: &TwiddleTable| -> Vec<[u32; 4]> {
        t.entries()
            .iter()
            .map(|e| {
                [
                    e.twiddle[0].to_bits(),
                    e.twiddle[1].to_bits(),
                    e.indices[0],
                    e.indices[1],
                ]
            })
            .collect()
    };
    assert_eq!(bits(&table), bits(&again));
}

#[test]
fn buffer_roles_follow_stage_parity() {
    init_logging();
    for (size, after_horizontal) in [(8u32, BufferRole::Scratch), (16, BufferRole::Grid)] {
        let backend = HostBackend::default();
        let grid = new_grid(&backend, size, &spatial_field(size as usize));
        let mut ifft = Ifft::new(&backend, size).expect("ifft");
        assert_eq!(ifft.last_roles(), None);
        backend.clear_events();
        ifft.transform(&grid).expect("transform");

        assert_eq!(
            ifft.last_roles(),
            Some(PassRoles {
                after_horizontal,
                after_vertical: BufferRole::Grid,
            })
        );

        let dispatches = backend.dispatches();
        let first_vertical = dispatches
            .iter()
            .find(|d| d.kernel == VERTICAL_STEP_KERNEL)
            .expect("vertical dispatch");
        assert_eq!(first_vertical.params.ping_pong, ifft.stages() % 2);
        let permute = dispatches.last().expect("permute dispatch");
        assert_eq!(permute.kernel, PERMUTE_KERNEL);
        assert_eq!(permute.params.ping_pong, 0);
    }
}

#[test]
fn every_dispatch_is_followed_by_a_barrier() {
    init_logging();
    let size = 64u32;
    let backend = HostBackend::ifft(8);
    let grid = new_grid(&backend, size, &spatial_field(size as usize));
    let mut ifft = Ifft::new(&backend, size).expect("ifft");
    backend.clear_events();
    ifft.transform(&grid).expect("transform");

    let events = backend.events();
    assert_eq!(events.len(), 2 * (2 * 6 + 1));
    for pair in events.chunks(2) {
        assert!(matches!(pair[0], HostEvent::Dispatch(_)));
        assert_eq!(pair[1], HostEvent::Barrier);
    }

    let dispatches = backend.dispatches();
    let kernels: Vec<&str> = dispatches.iter().map(|d| d.kernel.as_str()).collect();
    let mut expected = vec![HORIZONTAL_STEP_KERNEL; 6];
    expected.extend(vec![VERTICAL_STEP_KERNEL; 6]);
    expected.push(PERMUTE_KERNEL);
    assert_eq!(kernels, expected);

    for (idx, dispatch) in dispatches[..6].iter().enumerate() {
        assert_eq!(dispatch.params.step, idx as u32);
        assert_eq!(dispatch.params.ping_pong, (idx % 2) as u32);
        assert_eq!(dispatch.groups, [8, 8, 1]);
    }
}

#[test]
fn small_sizes_run_with_large_groups() {
    init_logging();
    let size = 2u32;
    let field = spatial_field(2);
    let spectrum = center_spectrum(&fft2(&field, 2), 2);

    let backend = HostBackend::ifft(16);
    let grid = new_grid(&backend, size, &spectrum);
    let config = IfftConfig::default()
        .with_local_group_size(16)
        .with_normalization(Normalization::InverseSquare);
    let mut ifft = Ifft::with_config(&backend, size, config).expect("ifft");
    backend.clear_events();
    ifft.transform(&grid).expect("transform");

    assert!(backend.dispatches().iter().all(|d| d.groups == [1, 1, 1]));
    assert_close(&download_grid(&backend, &grid).expect("download"), &field, 1e-5);
}

#[test]
fn invalid_sizes_allocate_nothing() {
    init_logging();
    let backend = HostBackend::default();
    for size in [0u32, 1, 6, 12, 100] {
        match Ifft::new(&backend, size) {
            Err(IfftError::InvalidSize { size: reported }) => assert_eq!(reported, size),
            Err(other) => panic!("size {size}: unexpected error {other}"),
            Ok(_) => panic!("size {size} accepted"),
        }
    }
    assert_eq!(backend.total_allocations(), 0);
    assert!(backend.dispatches().is_empty());
}

#[test]
fn missing_kernel_is_reported_before_allocation() {
    init_logging();
    let backend = HostBackend::new(HostProgram::ifft(8).without(VERTICAL_STEP_KERNEL));
    match Ifft::new(&backend, 16) {
        Err(IfftError::KernelNotFound { name }) => assert_eq!(name, VERTICAL_STEP_KERNEL),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("malformed program accepted"),
    }
    assert_eq!(backend.total_allocations(), 0);
}

#[test]
fn invalid_config_is_rejected() {
    init_logging();
    let backend = HostBackend::default();
    let config = IfftConfig::default().with_local_group_size(3);
    assert!(matches!(
        Ifft::with_config(&backend, 16, config),
        Err(IfftError::InvalidConfig(_))
    ));
    assert_eq!(backend.total_allocations(), 0);
}

#[test]
fn local_group_size_must_match_backend() {
    init_logging();
    let backend = HostBackend::ifft(8);
    let config = IfftConfig::default().with_local_group_size(16);
    match Ifft::with_config(&backend, 64, config) {
        Err(IfftError::InvalidConfig(message)) => assert!(message.contains("16"), "{message}"),
        other => panic!("expected InvalidConfig, got {:?}", other.map(|_| ())),
    }
    assert_eq!(backend.total_allocations(), 0);
    assert!(backend.events().is_empty());

    let matching = IfftConfig::default().with_local_group_size(8);
    assert!(Ifft::with_config(&backend, 64, matching).is_ok());
}

#[test]
fn device_error_aborts_remaining_stages() {
    init_logging();
    let size = 16u32;
    let backend = HostBackend::default();
    let grid = new_grid(&backend, size, &spatial_field(size as usize));
    let mut ifft = Ifft::new(&backend, size).expect("ifft");
    backend.clear_events();
    backend.fail_dispatch_after(2);

    let err = ifft.transform(&grid).expect_err("injected failure");
    match &err {
        IfftError::Device { context, .. } => assert_eq!(context, "horizontal step 2"),
        other => panic!("unexpected error {other}"),
    }
    let dispatches = backend.dispatches();
    assert_eq!(dispatches.len(), 2);
    assert!(dispatches.iter().all(|d| d.kernel == HORIZONTAL_STEP_KERNEL));
    assert_eq!(ifft.last_roles(), None);
}

#[test]
fn failed_precompute_releases_buffers() {
    init_logging();
    let backend = HostBackend::default();
    backend.fail_dispatch_after(0);
    assert!(matches!(
        Ifft::new(&backend, 16),
        Err(IfftError::Device { .. })
    ));
    assert_eq!(backend.total_allocations(), 2);
    assert_eq!(backend.live_buffers(), 0);
}

#[test]
fn mismatched_grid_is_rejected() {
    init_logging();
    let backend = HostBackend::default();
    let mut ifft = Ifft::new(&backend, 16).expect("ifft");

    let small = backend
        .create_buffer(&BufferDescriptor::complex_grid("small", 8))
        .expect("grid");
    assert!(matches!(
        ifft.transform(&small),
        Err(IfftError::GridMismatch {
            expected: 16,
            width: 8,
            height: 8,
            ..
        })
    ));

    let table_shaped = backend
        .create_buffer(&BufferDescriptor::new("table", 16, 16, BufferFormat::TwiddleEntry))
        .expect("buffer");
    assert!(matches!(
        ifft.transform(&table_shaped),
        Err(IfftError::GridMismatch {
            format: BufferFormat::TwiddleEntry,
            ..
        })
    ));
}

#[test]
fn drop_releases_owned_buffers() {
    init_logging();
    let backend = HostBackend::default();
    let grid = new_grid(&backend, 16, &spatial_field(16));
    let ifft = Ifft::new(&backend, 16).expect("ifft");
    assert_eq!(backend.live_buffers(), 3);
    drop(ifft);
    assert_eq!(backend.live_buffers(), 1);
    assert!(download_grid(&backend, &grid).is_ok());
}

#[test]
fn repeated_transforms_are_identical() {
    init_logging();
    let size = 32u32;
    let field = spatial_field(size as usize);
    let backend = Arc::new(HostBackend::default());
    let grid = new_grid(&backend, size, &field);
    let mut ifft = Ifft::new(Arc::clone(&backend), size).expect("ifft");

    ifft.transform(&grid).expect("first transform");
    let first = download_grid(&*backend, &grid).expect("download");
    upload_grid(&*backend, &grid, &field).expect("upload");
    ifft.transform(&grid).expect("second transform");
    let second = download_grid(&*backend, &grid).expect("download");
    assert_eq!(first, second);
}

#[test]
fn permute_applies_checkerboard_from_either_buffer() {
    init_logging();
    let size = 4u32;
    let n = size as usize;
    let backend = HostBackend::default();
    let permute = backend.find_kernel(PERMUTE_KERNEL).expect("permute kernel");
    let grid = new_grid(&backend, size, &vec![Complex32::new(2.0, 0.0); n * n]);
    let scratch = new_grid(&backend, size, &vec![Complex32::new(1.0, -1.0); n * n]);
    backend.bind_buffer(permute, BufferSlot::Grid, &grid).expect("bind grid");
    backend
        .bind_buffer(permute, BufferSlot::PingPong, &scratch)
        .expect("bind scratch");
    backend.set_scalar(ScalarSlot::Size, ScalarValue::U32(size)).expect("size");

    // PingPong = 1: the source is the scratch buffer
    backend.set_scalar(ScalarSlot::PingPong, ScalarValue::Bool(true)).expect("flag");
    backend.dispatch(permute, [1, 1, 1]).expect("dispatch");
    let out = download_grid(&backend, &grid).expect("download");
    for y in 0..n {
        for x in 0..n {
            let sign = if (x + y) % 2 == 0 { 1.0 } else { -1.0 };
            assert_eq!(out[y * n + x], Complex32::new(sign, -sign));
        }
    }

    // PingPong = 0: in place on the grid, undoing the signs
    backend.set_scalar(ScalarSlot::PingPong, ScalarValue::Bool(false)).expect("flag");
    backend.dispatch(permute, [1, 1, 1]).expect("dispatch");
    let out = download_grid(&backend, &grid).expect("download");
    assert!(out.iter().all(|c| *c == Complex32::new(1.0, -1.0)));
}

#[test]
fn config_from_env_drives_transform() {
    init_logging();
    let config = IfftConfig::from_lookup(|key| match key {
        "OCEANFFT_LOCAL_GROUP_SIZE" => Some("4".to_string()),
        "OCEANFFT_NORMALIZATION" => Some("inverse-square".to_string()),
        _ => None,
    });
    let backend = HostBackend::ifft(config.local_group_size);
    let field = spatial_field(8);
    let grid = new_grid(&backend, 8, &center_spectrum(&fft2(&field, 8), 8));
    let mut ifft = Ifft::with_config(&backend, 8, config).expect("ifft");
    ifft.transform(&grid).expect("transform");
    assert_close(&download_grid(&backend, &grid).expect("download"), &field, 1e-4);
}
