use crate::camera::Frame;
use crate::command::{DriveCommand, CLASS_NAMES};
use crate::error::ModelError;
use image::{imageops, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Fixed bias subtracted from every channel value, matching the centering
/// the model was trained with.
const PIXEL_BIAS: f32 = 127.0;

/// The inference collaborator. Implementations wrap an external engine that
/// maps a flattened `3 x side x side` pixel tensor to one of the
/// [`CLASS_NAMES`] class indices. The model is immutable after load.
pub trait Classifier: Send + Sync {
    fn predict(&self, input: &[f32]) -> Result<usize, ModelError>;
}

/// Converts a captured frame into the classifier's input tensor and its
/// output into a drive command.
pub struct InferenceAdapter {
    classifier: Box<dyn Classifier>,
    input_side: u32,
}

impl InferenceAdapter {
    pub fn new(classifier: Box<dyn Classifier>, input_side: u32) -> Self {
        Self {
            classifier,
            input_side,
        }
    }

    /// Preprocess, run inference, and map the arg-max class to a command.
    pub fn infer(&self, frame: &Frame) -> Result<DriveCommand, ModelError> {
        let tensor = preprocess(frame, self.input_side)?;
        let index = self.classifier.predict(&tensor)?;
        let command = DriveCommand::from_class_index(index)?;
        debug!("Classifier decision: {}", CLASS_NAMES[index]);
        Ok(command)
    }
}

/// Convert a raw RGB frame into the flattened planar tensor the model
/// expects: resize to `side x side`, reorder channels to BGR, transpose to
/// channel-major, and center by subtracting the fixed bias.
pub fn preprocess(frame: &Frame, side: u32) -> Result<Vec<f32>, ModelError> {
    let expected = Frame::expected_len(frame.width, frame.height);
    let image: RgbImage =
        RgbImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or(
            ModelError::InputShape {
                expected,
                actual: frame.data.len(),
            },
        )?;

    let resized = imageops::resize(&image, side, side, imageops::FilterType::Lanczos3);

    let side = side as usize;
    let mut tensor = Vec::with_capacity(3 * side * side);
    for channel in [2usize, 1, 0] {
        for y in 0..side {
            for x in 0..side {
                let pixel = resized.get_pixel(x as u32, y as u32);
                tensor.push(pixel[channel] as f32 - PIXEL_BIAS);
            }
        }
    }

    Ok(tensor)
}

/// Stand-in for the external inference engine: always answers with a
/// configurable class index. Used by the reference binary and the test
/// suite; a real engine plugs in through the [`Classifier`] trait.
pub struct SimulatedClassifier {
    class: AtomicUsize,
    expected_len: usize,
}

impl SimulatedClassifier {
    pub fn new(input_side: u32) -> Self {
        Self {
            class: AtomicUsize::new(0),
            expected_len: 3 * (input_side as usize) * (input_side as usize),
        }
    }

    /// Change the class index returned by subsequent predictions.
    pub fn set_class(&self, index: usize) {
        self.class.store(index, Ordering::SeqCst);
    }
}

impl Classifier for SimulatedClassifier {
    fn predict(&self, input: &[f32]) -> Result<usize, ModelError> {
        if input.len() != self.expected_len {
            return Err(ModelError::InputShape {
                expected: self.expected_len,
                actual: input.len(),
            });
        }
        Ok(self.class.load(Ordering::SeqCst))
    }
}

impl Classifier for std::sync::Arc<SimulatedClassifier> {
    fn predict(&self, input: &[f32]) -> Result<usize, ModelError> {
        self.as_ref().predict(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn uniform_frame(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let mut data = Vec::with_capacity(Frame::expected_len(width, height));
        for _ in 0..(width * height) {
            data.extend_from_slice(&rgb);
        }
        Frame {
            width,
            height,
            data,
            timestamp: SystemTime::now(),
        }
    }

    #[test]
    fn tensor_is_planar_bgr_with_bias() {
        let frame = uniform_frame(4, 4, [200, 100, 50]);
        let tensor = preprocess(&frame, 2).unwrap();

        assert_eq!(tensor.len(), 3 * 2 * 2);
        // Plane order is B, G, R; every plane is uniform.
        assert!(tensor[0..4].iter().all(|v| *v == 50.0 - 127.0));
        assert!(tensor[4..8].iter().all(|v| *v == 100.0 - 127.0));
        assert!(tensor[8..12].iter().all(|v| *v == 200.0 - 127.0));
    }

    #[test]
    fn single_pixel_roundtrip() {
        let frame = uniform_frame(1, 1, [10, 20, 30]);
        let tensor = preprocess(&frame, 1).unwrap();
        assert_eq!(tensor, vec![30.0 - 127.0, 20.0 - 127.0, 10.0 - 127.0]);
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let mut frame = uniform_frame(4, 4, [0, 0, 0]);
        frame.data.truncate(5);
        assert!(matches!(
            preprocess(&frame, 2),
            Err(ModelError::InputShape { .. })
        ));
    }

    #[test]
    fn adapter_maps_classes_to_commands() {
        let classifier = SimulatedClassifier::new(2);
        classifier.set_class(2);
        let adapter = InferenceAdapter::new(Box::new(classifier), 2);

        let frame = uniform_frame(4, 4, [1, 2, 3]);
        assert_eq!(adapter.infer(&frame).unwrap(), DriveCommand::Right);
    }

    #[test]
    fn adapter_rejects_out_of_range_class() {
        let classifier = SimulatedClassifier::new(2);
        classifier.set_class(7);
        let adapter = InferenceAdapter::new(Box::new(classifier), 2);

        let frame = uniform_frame(4, 4, [1, 2, 3]);
        assert!(matches!(
            adapter.infer(&frame),
            Err(ModelError::ClassIndex { index: 7 })
        ));
    }
}
