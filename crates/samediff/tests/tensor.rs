use samediff::tensor::{AllocationKind, DType, DataBuffer, NdArray, Order, Shape};

#[test]
fn from_vec_checks_length() {
    let err = NdArray::from_vec(Shape::new(vec![2, 3]), vec![1.0f32; 5]);
    assert!(err.is_err());
}

#[test]
fn get_put_roundtrip() {
    let mut a = NdArray::zeros(Shape::new(vec![2, 3]), DType::F32);
    a.put(&[1, 2], 7.5f32).unwrap();
    assert_eq!(a.get::<f32>(&[1, 2]).unwrap(), 7.5);
    assert_eq!(a.get::<f32>(&[0, 0]).unwrap(), 0.0);
}

#[test]
fn index_out_of_bounds_is_an_error() {
    let a = NdArray::zeros(Shape::new(vec![2, 3]), DType::F32);
    assert!(a.get::<f32>(&[2, 0]).is_err());
    assert!(a.get::<f32>(&[0, 3]).is_err());
    assert!(a.get::<f32>(&[0]).is_err());
}

#[test]
fn reshape_preserves_row_major_order() {
    let a = NdArray::from_vec(Shape::new(vec![2, 3]), (0..6).map(|v| v as f32).collect())
        .unwrap();
    let b = a.reshape(Shape::new(vec![3, 2])).unwrap();
    assert_eq!(b.to_vec::<f32>().unwrap(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    // Round trip restores the original exactly.
    let c = b.reshape(Shape::new(vec![2, 3])).unwrap();
    assert!(c.all_close(&a, 0.0));
}

#[test]
fn reshape_with_wrong_count_fails() {
    let a = NdArray::zeros(Shape::new(vec![2, 3]), DType::F32);
    assert!(a.reshape(Shape::new(vec![4, 2])).is_err());
}

#[test]
fn contiguous_reshape_aliases_the_buffer() {
    let a = NdArray::from_vec(Shape::new(vec![4]), vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
    let mut b = a.reshape(Shape::new(vec![2, 2])).unwrap();
    assert!(b.aliases(&a));
    b.put(&[0, 0], 9.0f32).unwrap();
    assert_eq!(a.get::<f32>(&[0]).unwrap(), 9.0);
}

#[test]
fn transpose_is_a_view_and_dup_is_independent() {
    let a = NdArray::from_vec(Shape::new(vec![2, 3]), (0..6).map(|v| v as f32).collect())
        .unwrap();
    let t = a.transpose();
    assert_eq!(t.shape().dims(), &[3, 2]);
    assert!(t.aliases(&a));
    assert_eq!(t.get::<f32>(&[2, 1]).unwrap(), 5.0);

    let mut d = t.dup();
    assert!(!d.aliases(&a));
    d.put(&[0, 0], 100.0f32).unwrap();
    assert_eq!(a.get::<f32>(&[0, 0]).unwrap(), 0.0);
}

#[test]
fn dup_of_transpose_is_dense_in_new_order() {
    let a = NdArray::from_vec(Shape::new(vec![2, 2]), vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
    let d = a.transpose().dup();
    assert_eq!(d.to_vec::<f32>().unwrap(), vec![1.0, 3.0, 2.0, 4.0]);
    assert!(d.is_contiguous());
}

#[test]
fn buffer_views_share_storage() {
    let buffer = DataBuffer::from_vec(vec![0.0f32; 8]);
    let mut view = buffer.view(2, 4).unwrap();
    assert_eq!(view.kind(), AllocationKind::View);
    assert!(view.same_allocation(&buffer));
    view.put(0, 5.0f32).unwrap();
    assert_eq!(buffer.get::<f32>(2).unwrap(), 5.0);
}

#[test]
fn buffer_view_out_of_bounds_fails() {
    let buffer = DataBuffer::from_vec(vec![0.0f32; 8]);
    assert!(buffer.view(6, 4).is_err());
}

#[test]
fn subrange_aliases_flat_window() {
    let a = NdArray::from_vec(Shape::new(vec![6]), (0..6).map(|v| v as f64).collect())
        .unwrap();
    let mut window = a.subrange(2, 3).unwrap();
    assert_eq!(window.to_vec::<f64>().unwrap(), vec![2.0, 3.0, 4.0]);
    window.put(&[0], -1.0f64).unwrap();
    assert_eq!(a.get::<f64>(&[2]).unwrap(), -1.0);
}

#[test]
fn scalar_arrays_are_rank_zero() {
    let s = NdArray::scalar(3.5f64);
    assert_eq!(s.rank(), 0);
    assert_eq!(s.len(), 1);
    assert_eq!(s.scalar_value().unwrap(), 3.5);
}

#[test]
fn zero_size_arrays_are_legal() {
    let a = NdArray::zeros(Shape::new(vec![0, 3]), DType::F32);
    assert_eq!(a.len(), 0);
    assert!(a.to_vec::<f32>().unwrap().is_empty());
    let r = a.reshape(Shape::new(vec![3, 0])).unwrap();
    assert_eq!(r.len(), 0);
}

#[test]
fn cast_converts_values() {
    let a = NdArray::from_vec(Shape::new(vec![3]), vec![1i32, -2, 3]).unwrap();
    let f = a.cast(DType::F64);
    assert_eq!(f.to_vec::<f64>().unwrap(), vec![1.0, -2.0, 3.0]);
    assert_eq!(f.dtype(), DType::F64);
}

#[test]
fn typed_read_enforces_dtype() {
    let a = NdArray::zeros(Shape::new(vec![2]), DType::F32);
    assert!(a.get::<f64>(&[0]).is_err());
    assert!(a.to_vec::<i32>().is_err());
}

#[test]
fn fortran_order_strides() {
    let shape = Shape::new(vec![2, 3]);
    assert_eq!(shape.strides(Order::C), vec![3, 1]);
    assert_eq!(shape.strides(Order::F), vec![1, 2]);
}

#[test]
fn permute_rejects_bad_axes() {
    let a = NdArray::zeros(Shape::new(vec![2, 3, 4]), DType::F32);
    assert!(a.permute(&[0, 0, 1]).is_err());
    assert!(a.permute(&[0, 1]).is_err());
    assert!(a.permute(&[0, 1, 3]).is_err());
}
