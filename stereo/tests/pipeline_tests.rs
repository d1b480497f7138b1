use cv_hal::{BufferLocation, Device, INVALID_DISP_16, INVALID_DISP_8};
use cv_stereo::*;
use image::{GrayImage, ImageBuffer, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_texture(width: usize, height: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..width * height).map(|_| rng.gen_range(1..=255)).collect()
}

/// Right view is random texture; the left view shows it shifted right by `shift`.
fn shifted_pair(width: usize, height: usize, shift: usize, seed: u64) -> (Vec<u8>, Vec<u8>) {
    let right = random_texture(width, height, seed);
    let filler = random_texture(width, height, seed + 1);
    let left = (0..width * height)
        .map(|i| {
            let x = i % width;
            if x >= shift {
                right[i - shift]
            } else {
                filler[i]
            }
        })
        .collect();
    (left, right)
}

fn run_host(config: &StereoConfig, left: &[u8], right: &[u8]) -> Vec<u8> {
    let device = Device::cpu().unwrap();
    let mut sgm = StereoSgm::new(&device, config).unwrap();
    let mut out = vec![0u8; (config.width * config.height) as usize];
    sgm.execute(Source::Host(left), Source::Host(right), Destination::Host(&mut out))
        .unwrap();
    out
}

#[test]
fn test_every_supported_configuration_constructs() {
    let device = Device::cpu().unwrap();
    let mut constructed = 0;
    for inout in ExecuteInOut::ALL {
        for input_bits in [8, 16] {
            for output_bits in [8, 16] {
                for disparity_size in [64, 128] {
                    let config = StereoConfig::new(48, 32)
                        .with_inout(inout)
                        .with_depths(input_bits, output_bits)
                        .with_disparity_size(disparity_size);
                    let sgm = StereoSgm::new(&device, &config).unwrap();

                    let expected = match inout.input_location() {
                        BufferLocation::Device => 4,
                        BufferLocation::Host => 6,
                    };
                    assert_eq!(sgm.buffer_count(), expected, "{config:?}");
                    assert_eq!(device.memory_stats().live_buffers, expected);
                    assert_eq!(sgm.engine().disparity_size().count(), disparity_size);
                    assert_eq!(sgm.engine().input_depth().bits(), input_bits);

                    drop(sgm);
                    assert_eq!(device.memory_stats().live_bytes, 0);
                    constructed += 1;
                }
            }
        }
    }
    assert_eq!(constructed, 32);
}

#[test]
fn test_invalid_configurations_allocate_nothing() {
    let device = Device::cpu().unwrap();
    let base = StereoConfig::new(32, 32);
    let invalid = [
        base.with_depths(12, 8),
        base.with_depths(8, 0),
        base.with_depths(32, 32),
        base.with_disparity_size(256),
        base.with_disparity_size(0),
        StereoConfig::new(0, 32),
        base.with_params(Parameters::new(120, 10, 0.95)),
        base.with_params(Parameters::new(10, 120, 1.5)),
    ];
    for config in invalid {
        let err = StereoSgm::new(&device, &config).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{config:?}: {err}");
        let stats = device.memory_stats();
        assert_eq!(stats.live_buffers, 0);
        assert_eq!(stats.peak_bytes, 0);
    }
}

#[test]
fn test_allocation_failure_unwinds() {
    let device = Device::builder().with_memory_budget(16 * 1024).build().unwrap();
    let config = StereoConfig::new(64, 64);
    let err = StereoSgm::new(&device, &config).unwrap_err();
    assert!(matches!(err, Error::Hal(cv_hal::Error::MemoryError(_))));
    assert_eq!(device.memory_stats().live_buffers, 0);
    assert_eq!(device.memory_stats().live_bytes, 0);
}

#[test]
fn test_identical_images_give_zero_disparity() {
    let (w, h) = (640usize, 480usize);
    let img = random_texture(w, h, 42);
    let config = StereoConfig::new(w as u32, h as u32)
        .with_disparity_size(128)
        .with_depths(8, 16)
        .with_params(Parameters::new(10, 120, 0.95));

    let device = Device::cpu().unwrap();
    let mut sgm = StereoSgm::new(&device, &config).unwrap();
    let mut out = vec![0u16; w * h];
    sgm.execute(Source::Host(&img), Source::Host(&img), Destination::host16(&mut out))
        .unwrap();

    let valid: Vec<u16> = out.iter().copied().filter(|&d| d != INVALID_DISP_16).collect();
    assert!(!valid.is_empty());
    assert!(valid.iter().all(|&d| d == 0));
}

#[test]
fn test_uniform_shift_is_recovered() {
    let (w, h, d0) = (640usize, 480usize, 17usize);
    let (left, right) = shifted_pair(w, h, d0, 7);
    let config = StereoConfig::new(w as u32, h as u32)
        .with_disparity_size(64)
        .with_depths(8, 16);

    let device = Device::cpu().unwrap();
    let mut sgm = StereoSgm::new(&device, &config).unwrap();
    let mut out = vec![0u16; w * h];
    sgm.execute(Source::Host(&left), Source::Host(&right), Destination::host16(&mut out))
        .unwrap();

    let mut interior = 0;
    let mut valid = 0;
    for y in 8..h - 8 {
        for x in d0 + 24..w - 16 {
            interior += 1;
            let d = out[y * w + x];
            if d != INVALID_DISP_16 {
                valid += 1;
                assert_eq!(usize::from(d), d0, "at ({x}, {y})");
            }
        }
    }
    assert!(valid * 100 >= interior * 99, "{valid} of {interior} interior pixels valid");
}

#[test]
fn test_extreme_penalties_are_accepted_and_run() {
    let (w, h) = (32usize, 16usize);
    let left = random_texture(w, h, 31);
    let right = random_texture(w, h, 32);
    let device = Device::cpu().unwrap();

    for params in [Parameters::new(1, u32::MAX, 0.95), Parameters::new(u32::MAX - 1, u32::MAX, 1.0)] {
        let config = StereoConfig::new(w as u32, h as u32)
            .with_disparity_size(64)
            .with_params(params);
        let mut sgm = StereoSgm::new(&device, &config).unwrap();
        let mut out = vec![0u8; w * h];
        sgm.execute(Source::Host(&left), Source::Host(&right), Destination::Host(&mut out))
            .unwrap();
        assert!(out.iter().all(|&d| d < 64 || d == INVALID_DISP_8));
    }
}

#[test]
fn test_repeated_execution_is_idempotent() {
    let (w, h) = (96usize, 64usize);
    let (left, right) = shifted_pair(w, h, 5, 3);
    let config = StereoConfig::new(w as u32, h as u32).with_disparity_size(64);

    let device = Device::cpu().unwrap();
    let mut sgm = StereoSgm::new(&device, &config).unwrap();
    let mut first = vec![0u8; w * h];
    let mut second = vec![0u8; w * h];
    sgm.execute(Source::Host(&left), Source::Host(&right), Destination::Host(&mut first))
        .unwrap();
    sgm.execute(Source::Host(&left), Source::Host(&right), Destination::Host(&mut second))
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_execute_takes_no_device_memory() {
    let (w, h) = (64usize, 48usize);
    let (left, right) = shifted_pair(w, h, 4, 21);
    let config = StereoConfig::new(w as u32, h as u32)
        .with_disparity_size(128)
        .with_depths(8, 16);

    let device = Device::cpu().unwrap();
    let mut sgm = StereoSgm::new(&device, &config).unwrap();
    let before = device.memory_stats();
    let mut out = vec![0u16; w * h];
    sgm.execute(Source::Host(&left), Source::Host(&right), Destination::host16(&mut out))
        .unwrap();
    let after = device.memory_stats();
    assert_eq!(after.live_buffers, before.live_buffers);
    assert_eq!(after.live_bytes, before.live_bytes);
    assert_eq!(after.peak_bytes, before.peak_bytes);
}

#[test]
fn test_device_8bit_output_is_written_in_place() {
    let (w, h) = (96usize, 64usize);
    let (left, right) = shifted_pair(w, h, 6, 11);
    let base = StereoConfig::new(w as u32, h as u32).with_disparity_size(64);
    let reference = run_host(&base, &left, &right);

    let device = Device::cpu().unwrap();
    let mut sgm = StereoSgm::new(&device, &base.with_inout(ExecuteInOut::DeviceToDevice)).unwrap();
    let mut src_l = device.alloc_zeroed(w * h).unwrap();
    let mut src_r = device.alloc_zeroed(w * h).unwrap();
    let mut dst = device.alloc_zeroed(w * h).unwrap();
    device.upload(&mut src_l, &left).unwrap();
    device.upload(&mut src_r, &right).unwrap();

    device.reset_transfer_stats();
    sgm.execute(Source::Device(&src_l), Source::Device(&src_r), Destination::Device(&mut dst))
        .unwrap();
    assert_eq!(device.transfer_stats(), cv_hal::TransferStats::default());

    let mut out = vec![0u8; w * h];
    device.download(&dst, &mut out).unwrap();
    assert_eq!(out, reference);
}

#[test]
fn test_outputs_agree_across_locality_and_depth() {
    let (w, h) = (80usize, 48usize);
    let (left, right) = shifted_pair(w, h, 4, 21);
    let base = StereoConfig::new(w as u32, h as u32).with_disparity_size(64);
    let reference = run_host(&base, &left, &right);
    let widened: Vec<u16> = reference.iter().map(|&d| cv_hal::kernels::widen_disparity(d)).collect();

    let device = Device::cpu().unwrap();
    let mut dev_l = device.alloc_zeroed(w * h).unwrap();
    let mut dev_r = device.alloc_zeroed(w * h).unwrap();
    device.upload(&mut dev_l, &left).unwrap();
    device.upload(&mut dev_r, &right).unwrap();

    for inout in ExecuteInOut::ALL {
        for output_bits in [8u32, 16] {
            let config = base.with_inout(inout).with_depths(8, output_bits);
            let mut sgm = StereoSgm::new(&device, &config).unwrap();
            let (src_l, src_r) = match inout.input_location() {
                BufferLocation::Host => (Source::Host(&left), Source::Host(&right)),
                BufferLocation::Device => (Source::Device(&dev_l), Source::Device(&dev_r)),
            };
            let out_bytes = w * h * output_bits as usize / 8;

            let mut host = vec![0u8; out_bytes];
            match inout.output_location() {
                BufferLocation::Host => {
                    sgm.execute(src_l, src_r, Destination::Host(&mut host)).unwrap();
                }
                BufferLocation::Device => {
                    let mut dst = device.alloc_zeroed(out_bytes).unwrap();
                    sgm.execute(src_l, src_r, Destination::Device(&mut dst)).unwrap();
                    device.download(&dst, &mut host).unwrap();
                }
            }

            if output_bits == 8 {
                assert_eq!(host, reference, "{inout:?}");
            } else {
                let values: Vec<u16> = host
                    .chunks_exact(2)
                    .map(|b| u16::from_ne_bytes([b[0], b[1]]))
                    .collect();
                assert_eq!(values, widened, "{inout:?}");
            }
        }
    }
}

#[test]
fn test_16bit_input_matches_scaled_8bit_input() {
    let (w, h) = (96u32, 64u32);
    let (left, right) = shifted_pair(w as usize, h as usize, 9, 5);
    let scale = |px: &[u8]| -> ImageBuffer<Luma<u16>, Vec<u16>> {
        ImageBuffer::from_raw(w, h, px.iter().map(|&v| u16::from(v) * 250).collect()).unwrap()
    };
    let device = Device::cpu().unwrap();

    let config8 = StereoConfig::new(w, h).with_disparity_size(64).with_depths(8, 16);
    let mut sgm8 = StereoSgm::new(&device, &config8).unwrap();
    let map8 = sgm8
        .compute_gray(
            &GrayImage::from_raw(w, h, left.clone()).unwrap(),
            &GrayImage::from_raw(w, h, right.clone()).unwrap(),
        )
        .unwrap();

    let config16 = config8.with_depths(16, 16);
    let mut sgm16 = StereoSgm::new(&device, &config16).unwrap();
    let map16 = sgm16.compute_gray16(&scale(&left), &scale(&right)).unwrap();

    assert_eq!(map8, map16);
    assert!(map16.valid_count() > 0);
}

#[test]
fn test_post_processing_never_revalidates() {
    let (w, h) = (96usize, 64usize);
    let left = random_texture(w, h, 100);
    let right = random_texture(w, h, 200);
    let config = StereoConfig::new(w as u32, h as u32).with_disparity_size(64);
    let final_map = run_host(&config, &left, &right);

    let device = Device::cpu().unwrap();
    let mut src_l = device.alloc_zeroed(w * h).unwrap();
    let mut src_r = device.alloc_zeroed(w * h).unwrap();
    let mut raw_l = device.alloc_zeroed(w * h).unwrap();
    let mut raw_r = device.alloc_zeroed(w * h).unwrap();
    device.upload(&mut src_l, &left).unwrap();
    device.upload(&mut src_r, &right).unwrap();
    let engine = EngineVariant::select(DepthBits::Eight, DisparitySize::D64);
    engine
        .execute(&device, &mut raw_l, &mut raw_r, &src_l, &src_r, w, h, &Parameters::default())
        .unwrap();
    let mut raw = vec![0u8; w * h];
    device.download(&raw_l, &mut raw).unwrap();

    let invalid = |map: &[u8]| map.iter().filter(|&&d| d == INVALID_DISP_8).count();
    assert!(invalid(&final_map) >= invalid(&raw));
    for (i, (&r, &f)) in raw.iter().zip(&final_map).enumerate() {
        if r == INVALID_DISP_8 {
            assert_eq!(f, INVALID_DISP_8, "pixel {i} became valid");
        }
    }
}

#[test]
fn test_rejects_mismatched_buffers() {
    let (w, h) = (32usize, 16usize);
    let device = Device::cpu().unwrap();
    let config = StereoConfig::new(w as u32, h as u32).with_disparity_size(64);
    let mut sgm = StereoSgm::new(&device, &config).unwrap();
    let img = random_texture(w, h, 1);
    let dev_img = device.alloc_zeroed(w * h).unwrap();
    let mut out = vec![0u8; w * h];

    let err = sgm
        .execute(Source::Device(&dev_img), Source::Host(&img), Destination::Host(&mut out))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::LocalityMismatch {
            buffer: "left",
            expected: BufferLocation::Host,
            actual: BufferLocation::Device
        }
    ));

    let mut dev_out = device.alloc_zeroed(w * h).unwrap();
    let err = sgm
        .execute(Source::Host(&img), Source::Host(&img), Destination::Device(&mut dev_out))
        .unwrap_err();
    assert!(matches!(err, Error::LocalityMismatch { buffer: "destination", .. }));

    let err = sgm
        .execute(Source::Host(&img[1..]), Source::Host(&img), Destination::Host(&mut out))
        .unwrap_err();
    assert!(matches!(err, Error::BufferTooSmall { buffer: "left", .. }));

    let err = sgm
        .execute(Source::Host(&img), Source::Host(&img), Destination::Host(&mut out[..10]))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::BufferTooSmall {
            buffer: "destination",
            required: 512,
            actual: 10
        }
    ));
}

#[test]
fn test_rejects_buffers_of_another_device() {
    let (w, h) = (32usize, 16usize);
    let device = Device::cpu().unwrap();
    let other = Device::cpu().unwrap();
    let config = StereoConfig::new(w as u32, h as u32)
        .with_disparity_size(64)
        .with_inout(ExecuteInOut::DeviceToHost);
    let mut sgm = StereoSgm::new(&device, &config).unwrap();
    let foreign_l = other.alloc_zeroed(w * h).unwrap();
    let foreign_r = other.alloc_zeroed(w * h).unwrap();
    let mut out = vec![0u8; w * h];

    let err = sgm
        .execute(Source::Device(&foreign_l), Source::Device(&foreign_r), Destination::Host(&mut out))
        .unwrap_err();
    assert!(matches!(err, Error::Hal(cv_hal::Error::DeviceError(_))));
}

#[test]
fn test_image_helpers_check_shape() {
    let device = Device::cpu().unwrap();
    let config = StereoConfig::new(32, 16).with_disparity_size(64);
    let mut sgm = StereoSgm::new(&device, &config).unwrap();

    let small = GrayImage::new(16, 16);
    let right = GrayImage::new(32, 16);
    assert!(matches!(sgm.compute_gray(&small, &right), Err(Error::DimensionMismatch(_))));

    let img16 = ImageBuffer::<Luma<u16>, Vec<u16>>::new(32, 16);
    assert!(matches!(
        sgm.compute_gray16(&img16, &img16),
        Err(Error::PixelDepthMismatch {
            expected: DepthBits::Eight,
            actual: DepthBits::Sixteen
        })
    ));

    let left = GrayImage::from_raw(32, 16, random_texture(32, 16, 9)).unwrap();
    let map = sgm.compute_gray(&left, &left).unwrap();
    assert_eq!((map.width, map.height, map.disparity_size), (32, 16, 64));
    assert_eq!(map.to_image().dimensions(), (32, 16));
    assert_eq!(map.valid_count(), 32 * 16);
}

#[test]
fn test_independent_instances_run_concurrently() {
    let (w, h) = (96usize, 64usize);
    let (left, right) = shifted_pair(w, h, 8, 13);
    let config = StereoConfig::new(w as u32, h as u32).with_disparity_size(64);
    let reference = run_host(&config, &left, &right);
    let device = Device::cpu().unwrap();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let device = device.clone();
                let (left, right, config) = (&left, &right, &config);
                scope.spawn(move || {
                    let mut sgm = StereoSgm::new(&device, config).unwrap();
                    let mut out = vec![0u8; w * h];
                    sgm.execute(Source::Host(left), Source::Host(right), Destination::Host(&mut out))
                        .unwrap();
                    out
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), reference);
        }
    });
    assert_eq!(device.memory_stats().live_buffers, 0);
}
