pub mod box_renderer;
pub mod detecting_annotator;
