pub mod defect_detector;
