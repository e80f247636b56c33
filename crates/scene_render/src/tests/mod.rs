//! Whole-frame scenarios driven through the render system

mod frame_scenarios;
