mod calibration;
mod readings;
