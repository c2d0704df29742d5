mod build_image_tests;
mod build_package_tests;
mod common;
mod create_sysroot_tests;
