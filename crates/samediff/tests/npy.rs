use samediff::io::{
    from_npy_bytes, from_npz_bytes, load_npy, save_npy, to_npy_bytes, to_npz_bytes, NpyError,
};
use samediff::tensor::{DType, NdArray, Shape};

fn roundtrip(array: &NdArray) -> NdArray {
    from_npy_bytes(&to_npy_bytes(array)).unwrap()
}

#[test]
fn f32_matrix_roundtrip() {
    let a = NdArray::from_vec(Shape::new(vec![3, 4]), (0..12).map(|v| v as f32).collect())
        .unwrap();
    let b = roundtrip(&a);
    assert_eq!(b.dtype(), DType::F32);
    assert_eq!(b.shape().dims(), &[3, 4]);
    assert_eq!(b.to_vec::<f32>().unwrap(), a.to_vec::<f32>().unwrap());
}

#[test]
fn all_dtypes_roundtrip() {
    let arrays = vec![
        NdArray::full(Shape::new(vec![5]), DType::F16, 1.5),
        NdArray::from_vec(Shape::new(vec![2, 2]), vec![1.0f32, -2.5, 3.25, 0.0]).unwrap(),
        NdArray::from_vec(Shape::new(vec![3]), vec![f64::MIN, 0.0, f64::MAX]).unwrap(),
        NdArray::from_vec(Shape::new(vec![4]), vec![i32::MIN, -1, 0, i32::MAX]).unwrap(),
        NdArray::from_vec(Shape::new(vec![2]), vec![i64::MIN, i64::MAX]).unwrap(),
        NdArray::from_vec(Shape::new(vec![3]), vec![0u8, 1, 1]).unwrap(),
    ];
    for a in arrays {
        let b = roundtrip(&a);
        assert_eq!(b.dtype(), a.dtype());
        assert_eq!(b.shape(), a.shape());
        assert_eq!(b.buffer().bytes(), a.buffer().bytes());
    }
}

#[test]
fn zero_dimensional_roundtrip() {
    let a = NdArray::scalar(42.0f64);
    let b = roundtrip(&a);
    assert_eq!(b.rank(), 0);
    assert_eq!(b.scalar_value().unwrap(), 42.0);
}

#[test]
fn empty_array_roundtrip() {
    let a = NdArray::zeros(Shape::new(vec![0, 4]), DType::F32);
    let b = roundtrip(&a);
    assert_eq!(b.shape().dims(), &[0, 4]);
    assert_eq!(b.len(), 0);
}

#[test]
fn serialization_is_byte_stable() {
    let a = NdArray::from_vec(Shape::new(vec![2, 3]), (0..6).map(|v| v as f32).collect())
        .unwrap();
    assert_eq!(to_npy_bytes(&a), to_npy_bytes(&a));
    // Writing a parsed array reproduces identical bytes.
    let bytes = to_npy_bytes(&a);
    let b = from_npy_bytes(&bytes).unwrap();
    assert_eq!(to_npy_bytes(&b), bytes);
}

#[test]
fn data_section_is_64_byte_aligned() {
    let a = NdArray::zeros(Shape::new(vec![7]), DType::F64);
    let bytes = to_npy_bytes(&a);
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    assert_eq!((10 + header_len) % 64, 0);
    assert_eq!(bytes[10 + header_len - 1], b'\n');
}

#[test]
fn bad_magic_fails() {
    let err = from_npy_bytes(b"not an npy file").unwrap_err();
    assert!(matches!(err, NpyError::InvalidMagic));
}

#[test]
fn truncated_payload_fails() {
    let a = NdArray::zeros(Shape::new(vec![8]), DType::F32);
    let mut bytes = to_npy_bytes(&a);
    bytes.truncate(bytes.len() - 4);
    let err = from_npy_bytes(&bytes).unwrap_err();
    assert!(matches!(err, NpyError::PayloadLength { .. }));
}

#[test]
fn corrupt_header_fails() {
    let a = NdArray::zeros(Shape::new(vec![2]), DType::F32);
    let mut bytes = to_npy_bytes(&a);
    // Clobber the descr field inside the header dict.
    let header_end = 10 + u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    for b in bytes[10..header_end.min(30)].iter_mut() {
        *b = b'x';
    }
    assert!(from_npy_bytes(&bytes).is_err());
}

#[test]
fn unsupported_version_fails() {
    let a = NdArray::zeros(Shape::new(vec![2]), DType::F32);
    let mut bytes = to_npy_bytes(&a);
    bytes[6] = 2;
    let err = from_npy_bytes(&bytes).unwrap_err();
    assert!(matches!(err, NpyError::UnsupportedVersion { major: 2, minor: 0 }));
}

#[test]
fn file_roundtrip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("array.npy");
    let a = NdArray::from_vec(Shape::new(vec![4]), vec![1.0f32, 2.0, 3.0, 4.0])?;
    save_npy(&path, &a)?;
    let b = load_npy(&path)?;
    assert!(b.all_close(&a, 0.0));
    Ok(())
}

#[test]
fn npz_roundtrip_preserves_names_and_order() {
    let entries = vec![
        (
            "weights".to_string(),
            NdArray::from_vec(Shape::new(vec![2, 2]), vec![1.0f32, 2.0, 3.0, 4.0]).unwrap(),
        ),
        ("bias".to_string(), NdArray::zeros(Shape::new(vec![2]), DType::F64)),
        ("flag".to_string(), NdArray::scalar(1u8)),
    ];
    let bytes = to_npz_bytes(&entries);
    let loaded = from_npz_bytes(&bytes).unwrap();
    assert_eq!(loaded.len(), 3);
    for ((name, original), (loaded_name, loaded_array)) in entries.iter().zip(&loaded) {
        assert_eq!(name, loaded_name);
        assert_eq!(original.buffer().bytes(), loaded_array.buffer().bytes());
        assert_eq!(original.shape(), loaded_array.shape());
    }
}

#[test]
fn npz_detects_corruption() {
    let entries = vec![(
        "a".to_string(),
        NdArray::from_vec(Shape::new(vec![4]), vec![1.0f32, 2.0, 3.0, 4.0]).unwrap(),
    )];
    let mut bytes = to_npz_bytes(&entries);
    // Flip a data byte inside the first entry's npy payload.
    let flip_at = 30 + "a.npy".len() + 70;
    bytes[flip_at] ^= 0xff;
    assert!(from_npz_bytes(&bytes).is_err());
}
