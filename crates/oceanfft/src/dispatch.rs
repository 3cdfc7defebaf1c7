pub fn dispatch_size(elements: u32, workgroup: u32) -> u32 {
    if elements == 0 {
        0
    } else {
        elements.div_ceil(workgroup.max(1)).max(1)
    }
}

/// Groups needed to cover an `extent_x × extent_y` invocation grid.
pub fn dispatch_groups(extent_x: u32, extent_y: u32, workgroup: [u32; 3]) -> [u32; 3] {
    [
        dispatch_size(extent_x, workgroup[0]),
        dispatch_size(extent_y, workgroup[1]),
        1,
    ]
}
