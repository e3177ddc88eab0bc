//! End-to-end dataset scenarios against the built-in GeoTIFF driver

use super::*;
use crate::array::RasterArray;
use crate::env::{self, Environment};
use crate::memfile::MemoryFile;
use crate::window::Window;

const WIDTH: usize = 791;
const HEIGHT: usize = 718;

fn scene_transform() -> Affine {
    Affine::new(300.04, 0.0, 101985.0, 0.0, -300.04, 2826915.0)
}

fn pixel(band: usize, row: usize, col: usize) -> u8 {
    ((band * 40 + row * 3 + col * 7) % 256) as u8
}

fn scene_array() -> RasterArray<u8> {
    let mut data = Vec::with_capacity(3 * HEIGHT * WIDTH);
    for band in 0..3 {
        for row in 0..HEIGHT {
            for col in 0..WIDTH {
                data.push(pixel(band, row, col));
            }
        }
    }
    RasterArray::from_vec((3, HEIGHT, WIDTH), data).unwrap()
}

fn scene_options() -> OpenOptions {
    OpenOptions::new()
        .mode(Mode::Write)
        .width(WIDTH)
        .height(HEIGHT)
        .count(3)
        .dtype(DType::U8)
        .transform(scene_transform())
        .crs("EPSG:32618")
}

/// GeoTIFF bytes of the 3-band scene
fn scene_bytes(options: OpenOptions) -> Vec<u8> {
    let mut file = MemoryFile::new();
    let mut ds = file.open_with(&options).unwrap();
    ds.write(&scene_array(), &[], None).unwrap();
    ds.close().unwrap();
    let bytes = file.get_buffer().unwrap().to_vec();
    bytes
}

#[test]
fn test_scene_georeferencing() {
    let mut file = MemoryFile::from_bytes(scene_bytes(scene_options()));
    let ds = file.open().unwrap();
    assert_eq!(ds.driver(), "GTiff");
    assert_eq!(ds.mode(), Mode::Read);
    assert_eq!((ds.count(), ds.height(), ds.width()), (3, HEIGHT, WIDTH));
    assert_eq!(ds.dtypes(), &[DType::U8, DType::U8, DType::U8]);
    assert_eq!(ds.transform(), scene_transform());
    assert_eq!(ds.crs(), Some("EPSG:32618"));

    assert_eq!(ds.xy(0.0, 0.0), (101985.0, 2826915.0));
    let (row, col) = ds.index(201985.0, 2776915.0).unwrap();
    assert_eq!((row, col), (166, 333));

    let window = Window::from_offsets(col as f64, row as f64, 1.0, 1.0).unwrap();
    let value = ds.read::<u8>(&[1], &ReadOptions::new().window(window)).unwrap();
    assert_eq!(value.as_slice(), &[pixel(0, 166, 333)]);

    let bounds = ds.bounds();
    assert_eq!(bounds.left, 101985.0);
    assert_eq!(bounds.top, 2826915.0);
    assert!((bounds.right - (101985.0 + 300.04 * WIDTH as f64)).abs() < 1e-6);
}

#[test]
fn test_window_matches_full_read_slice() {
    let options = scene_options()
        .creation_option("TILED", "YES")
        .creation_option("COMPRESS", "DEFLATE");
    let mut file = MemoryFile::from_bytes(scene_bytes(options));
    let ds = file.open().unwrap();
    assert_eq!(ds.block_shape(), (256, 256));

    let window = Window::new(300.0, 400.0, 200.0, 400.0).unwrap();
    let part = ds.read::<u8>(&[], &ReadOptions::new().window(window)).unwrap();
    assert_eq!(part.shape(), (3, 100, 200));

    let full = ds.read::<u8>(&[], &ReadOptions::new()).unwrap();
    assert_eq!(full, scene_array());
    assert_eq!(part, full.slice(&window).unwrap());
}

#[test]
fn test_chunked_memory_file_matches_source() {
    let bytes = scene_bytes(scene_options().creation_option("COMPRESS", "PACKBITS"));

    let mut spooled = MemoryFile::new();
    for chunk in bytes.chunks(8192) {
        spooled.append(chunk).unwrap();
    }
    assert_eq!(spooled.len(), bytes.len());

    let mut direct = MemoryFile::from_bytes(bytes);
    let a = spooled.open().unwrap().read::<u8>(&[], &ReadOptions::new()).unwrap();
    let b = direct.open().unwrap().read::<u8>(&[], &ReadOptions::new()).unwrap();
    assert_eq!(a, b);
    assert!(matches!(spooled.append(&[0]), Err(Error::SealedFile(_))));
}

#[test]
fn test_block_windows_tile_the_grid() {
    let options = scene_options().creation_option("TILED", "YES").creation_option("BLOCKXSIZE", "512");
    let mut file = MemoryFile::from_bytes(scene_bytes(options));
    let ds = file.open().unwrap();
    let blocks = ds.block_windows();
    assert_eq!(blocks.len(), 2 * 3);
    let area: f64 = blocks.iter().map(|(_, w)| w.width() * w.height()).sum();
    assert_eq!(area, (WIDTH * HEIGHT) as f64);
    assert_eq!(blocks.last().unwrap().0, (2, 1));
}

#[test]
fn test_close_is_idempotent() {
    let mut file = MemoryFile::new();
    let mut ds = file.open_with(&scene_options()).unwrap();
    ds.close().unwrap();
    let len = file.len();
    assert!(ds.closed());
    ds.close().unwrap();
    assert_eq!(file.len(), len);
    assert_eq!(ds.width(), WIDTH);
    assert!(matches!(ds.read::<u8>(&[], &ReadOptions::new()), Err(Error::ClosedResource(_))));
}

#[test]
fn test_nodata_zero_mask_derivation() {
    let bytes = scene_bytes(scene_options().nodata(0.0));
    let mut file = MemoryFile::from_bytes(bytes);
    let ds = file.open().unwrap();
    assert_eq!(ds.nodatavals(), &[Some(0.0), Some(0.0), Some(0.0)]);

    let masked = ds.read_masked::<u8>(&[1], &ReadOptions::new()).unwrap();
    assert!(masked.mask().iter().any(|&m| m));
    for (value, invalid) in masked.data().iter().zip(masked.mask()) {
        assert_eq!(*invalid, *value == 0);
    }
}

#[test]
fn test_round_trip_float() {
    let mut file = MemoryFile::new();
    let options = OpenOptions::new()
        .mode(Mode::Write)
        .width(37)
        .height(21)
        .count(2)
        .dtype(DType::F32)
        .nodata(f64::NAN)
        .creation_option("COMPRESS", "DEFLATE")
        .creation_option("BLOCKYSIZE", "5");
    let data: Vec<f32> = (0..2 * 21 * 37).map(|i| i as f32 * 0.25 - 100.0).collect();
    let array = RasterArray::from_vec((2, 21, 37), data).unwrap();
    {
        let mut ds = file.open_with(&options).unwrap();
        ds.write(&array, &[], None).unwrap();
    }

    let ds = file.open().unwrap();
    assert!(ds.nodata().unwrap().is_nan());
    assert_eq!(ds.block_shape(), (5, 37));
    assert_eq!(ds.read::<f32>(&[], &ReadOptions::new()).unwrap(), array);
}

#[test]
fn test_partial_band_write() {
    let mut file = MemoryFile::new();
    let mut ds = file.open_with(&scene_options()).unwrap();
    ds.write(&scene_array(), &[], None).unwrap();

    let window = Window::new(10.0, 20.0, 30.0, 50.0).unwrap();
    ds.write(&RasterArray::filled((1, 10, 20), 255u8), &[2], Some(&window)).unwrap();
    ds.close().unwrap();

    let ds = file.open_with(&OpenOptions::new()).unwrap();
    let back = ds.read::<u8>(&[], &ReadOptions::new()).unwrap();
    let expected = scene_array();
    assert_eq!(back.band(0), expected.band(0));
    assert_eq!(back.band(2), expected.band(2));
    assert_eq!(back[(1, 15, 40)], 255);
    assert_eq!(back[(1, 20, 40)], expected[(1, 20, 40)]);
}

#[test]
fn test_boundless_read_keeps_window_shape() {
    let mut file = MemoryFile::from_bytes(scene_bytes(scene_options()));
    let ds = file.open().unwrap();
    let windows = [
        Window::new(-10.0, 5.0, -3.0, 4.0).unwrap(),
        Window::new(700.0, 800.0, 780.0, 900.0).unwrap(),
        Window::new(-50.0, -40.0, 1000.0, 1001.0).unwrap(),
        Window::new(0.0, HEIGHT as f64, 0.0, WIDTH as f64).unwrap(),
    ];
    for window in windows {
        let options = ReadOptions::new().window(window).boundless(true);
        let masked = ds.read_masked::<u8>(&[2, 3], &options).unwrap();
        let (rows, cols) = window.boundless_shape();
        assert_eq!(masked.shape(), (2, rows, cols), "{}", window);
    }

    let corner = Window::new(-1.0, 1.0, -1.0, 1.0).unwrap();
    let masked = ds
        .read_masked::<u8>(&[1], &ReadOptions::new().window(corner).boundless(true))
        .unwrap();
    assert_eq!(masked.data().as_slice(), &[0, 0, 0, pixel(0, 0, 0)]);
    assert_eq!(masked.mask(), &[true, true, true, false]);
}

#[test]
fn test_read_only_rejects_writes() {
    let mut file = MemoryFile::from_bytes(scene_bytes(scene_options()));
    let mut ds = file.open().unwrap();
    let err = ds.write(&RasterArray::<u8>::zeros((1, 1, 1)), &[1], None).unwrap_err();
    assert!(matches!(err, Error::Mode("r")));
    assert!(matches!(ds.set_nodata(Some(0.0)), Err(Error::Mode("r"))));
    assert!(matches!(ds.write_mask(&[false], None), Err(Error::Mode("r"))));
}

#[test]
fn test_explicit_mask_wins_over_nodata() {
    let mut file = MemoryFile::new();
    let options = OpenOptions::new()
        .mode(Mode::Write)
        .width(4)
        .height(2)
        .count(1)
        .dtype(DType::U8)
        .nodata(0.0);
    {
        let mut ds = file.open_with(&options).unwrap();
        ds.write(&RasterArray::from_vec((1, 2, 4), vec![0u8, 1, 2, 3, 4, 5, 6, 7]).unwrap(), &[], None)
            .unwrap();
        ds.write_mask(&[false, false, true, true, false, false, false, false], None).unwrap();
        ds.close().unwrap();
    }

    let ds = file.open().unwrap();
    assert!(ds.has_mask());
    let masked = ds.read_masked::<u8>(&[], &ReadOptions::new()).unwrap();
    assert_eq!(masked.mask(), &[false, false, true, true, false, false, false, false]);
}

#[test]
fn test_local_file_round_trip_and_update() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scene.tif");
    let path = path.to_str().unwrap();

    let mut ds = scene_options().creation_option("COMPRESS", "DEFLATE").open(path).unwrap();
    ds.write(&scene_array(), &[], None).unwrap();
    ds.close().unwrap();

    {
        let mut ds = Dataset::open_update(path).unwrap();
        assert_eq!(ds.mode(), Mode::Update);
        let window = Window::new(0.0, 2.0, 0.0, 2.0).unwrap();
        ds.write(&RasterArray::filled((3, 2, 2), 9u8), &[], Some(&window)).unwrap();
        ds.set_nodata(Some(9.0)).unwrap();
    }

    let ds = Dataset::open(path).unwrap();
    assert_eq!(ds.nodata(), Some(9.0));
    assert_eq!(ds.profile().compress.as_deref(), Some("DEFLATE"));
    let back = ds.read::<u8>(&[3], &ReadOptions::new()).unwrap();
    assert_eq!(back[(0, 1, 1)], 9);
    assert_eq!(back[(0, 2, 2)], pixel(2, 2, 2));
}

#[test]
fn test_profile_recreates_compatible_dataset() {
    let mut file = MemoryFile::from_bytes(scene_bytes(scene_options().nodata(0.0)));
    let ds = file.open().unwrap();
    let json = ds.profile().to_json().unwrap();
    let profile = Profile::from_json(&json).unwrap();
    assert_eq!(profile, ds.profile());

    let mut copy = MemoryFile::new();
    let created = copy.open_with(&OpenOptions::from_profile(&profile)).unwrap();
    assert_eq!(created.shape(), ds.shape());
    assert_eq!(created.transform(), ds.transform());
    assert_eq!(created.crs(), ds.crs());
    assert_eq!(created.nodatavals(), ds.nodatavals());
    assert_eq!(created.block_shape(), ds.block_shape());
}

#[test]
fn test_scoped_configuration() {
    let bytes = scene_bytes(scene_options().creation_option("TILED", "YES"));
    let environment = Environment::global();
    let mut file = MemoryFile::from_bytes(bytes);
    let ds = {
        let _scope = environment
            .activate_with([(env::NUM_THREADS, "1"), (env::BLOCK_CACHE_SIZE, "2")])
            .unwrap();
        file.open().unwrap()
    };
    let window = Window::new(0.0, 300.0, 0.0, 600.0).unwrap();
    let part = ds.read::<u8>(&[1], &ReadOptions::new().window(window)).unwrap();
    let expected = scene_array().slice(&window).unwrap();
    assert_eq!(part.as_slice(), expected.band(0).unwrap());
}

/// Zeroes the value of `tag` in the first IFD of a little-endian classic TIFF
fn zero_tag(bytes: &mut [u8], tag: u16) {
    let ifd = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
    let count = u16::from_le_bytes([bytes[ifd], bytes[ifd + 1]]) as usize;
    let entry = (0..count)
        .map(|i| ifd + 2 + i * 12)
        .find(|&at| u16::from_le_bytes([bytes[at], bytes[at + 1]]) == tag)
        .unwrap();
    bytes[entry + 8..entry + 12].fill(0);
}

#[test]
fn test_zero_dimensions_fail_to_open() {
    let options = OpenOptions::new().mode(Mode::Write).width(4).height(3).count(1).dtype(DType::U8);
    let mut source = MemoryFile::new();
    source.open_with(&options).unwrap().close().unwrap();
    let bytes = source.get_buffer().unwrap().to_vec();

    for tag in [256, 257] {
        let mut patched = bytes.clone();
        zero_tag(&mut patched, tag);
        let mut file = MemoryFile::from_bytes(patched);
        match file.open() {
            Err(Error::DatasetOpen { message, .. }) => assert!(message.contains("dimensions"), "{}", message),
            other => panic!("tag {} opened as {:?}", tag, other.map(|ds| ds.shape())),
        }
    }
}

#[test]
fn test_mode_strings() {
    assert_eq!("r+".parse::<Mode>().unwrap(), Mode::Update);
    assert_eq!(Mode::Write.to_string(), "w");
    assert!("a".parse::<Mode>().is_err());
    assert!(!Mode::Read.is_writable());
}
