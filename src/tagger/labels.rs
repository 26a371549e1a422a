//! Fixed zero-shot category lists, carried verbatim from the reference
//! implementation's `OBJECT_CATEGORIES`/`SCENE_CATEGORIES` tables.

pub const OBJECT_CATEGORIES: &[&str] = &[
    "car", "dog", "cat", "bird", "horse", "bicycle", "motorcycle", "airplane", "boat", "train",
    "bus", "truck", "flower", "tree", "plant", "food", "cake", "pizza", "fruit", "book", "phone",
    "computer", "laptop", "bottle", "cup", "glass", "chair", "table", "bed", "couch", "clock",
    "mirror", "lamp", "castle", "church", "bridge", "tower", "baby", "child", "group of people",
];

pub const SCENE_CATEGORIES: &[&str] = &[
    "beach", "ocean", "sea", "mountain", "forest", "park", "garden", "city", "street", "building",
    "sunset", "sunrise", "night", "snow", "winter", "rain", "wedding", "party", "celebration",
    "birthday", "restaurant", "cafe", "kitchen", "bedroom", "living room", "office", "pool",
    "lake", "river", "waterfall", "desert", "field", "countryside", "stadium", "concert",
    "museum", "airport", "train station", "christmas", "holiday",
];
