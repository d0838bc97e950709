use ndarray::{ArrayView3, ArrayViewMut3};

/// Number of interleaved colour channels in every decoded frame (RGB24).
pub const RGB_CHANNELS: u8 = 3;

/// A single decoded video frame or image: contiguous RGB bytes in row-major order.
///
/// `index` is the frame's position in its source stream. Pixel format
/// conversion happens in the ffmpeg adapters; everything else sees RGB24.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
        }
    }

    /// An RGB frame where every pixel has the same colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], index: usize) -> Self {
        let pixels = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(pixels * RGB_CHANNELS as usize);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self::new(data, width, height, RGB_CHANNELS, index)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// True when `other` has the same width, height and channel layout.
    pub fn same_layout(&self, other: &Frame) -> bool {
        self.width == other.width && self.height == other.height && self.channels == other.channels
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    pub fn as_ndarray_mut(&mut self) -> ArrayViewMut3<'_, u8> {
        ArrayViewMut3::from_shape(self.shape(), &mut self.data)
            .expect("Frame data length must match dimensions")
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}
