mod decode;
mod estimate;
mod fixture;
