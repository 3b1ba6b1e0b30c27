pub mod decompress;
