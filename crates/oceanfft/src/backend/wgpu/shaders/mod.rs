pub mod ifft;
