//! Built-in sample knowledge base: short warehouse-operations notes used by
//! `kbchat seed` to get a fresh install answering questions.

pub struct SampleDocument {
    pub filename: &'static str,
    pub title: &'static str,
    pub category: &'static str,
    pub text: &'static str,
}

pub const SAMPLES: &[SampleDocument] = &[
    SampleDocument {
        filename: "wave-picking.txt",
        title: "Wave Picking",
        category: "Order Fulfillment",
        text: "Wave picking is a warehouse management method in which several orders are \
               grouped into batches and picked at the same time by warehouse workers. \
               Picking in waves improves efficiency and cuts the distance pickers travel.",
    },
    SampleDocument {
        filename: "fifo.txt",
        title: "FIFO (First-In-First-Out)",
        category: "Inventory Management",
        text: "FIFO (First-In-First-Out) is an inventory management method that makes sure \
               older stock is used before newer stock. Rotating stock this way prevents \
               spoilage and keeps product quality consistent.",
    },
    SampleDocument {
        filename: "cycle-counting.txt",
        title: "Cycle Counting",
        category: "Inventory Management",
        text: "Cycle counting is a systematic inventory audit in which small subsets of the \
               inventory are counted on a regular, rotating schedule. It keeps recorded stock \
               levels accurate without shutting the warehouse down for a full count.",
    },
    SampleDocument {
        filename: "cross-docking.txt",
        title: "Cross-Docking",
        category: "Logistics",
        text: "Cross-docking is a logistics practice in which products are transferred \
               directly from inbound to outbound transportation with little or no storage \
               time in between. It reduces handling and storage costs.",
    },
    SampleDocument {
        filename: "abc-analysis.txt",
        title: "ABC Analysis",
        category: "Inventory Management",
        text: "ABC analysis sorts inventory into three groups: A items are high value and low \
               quantity, B items are moderate in both value and quantity, and C items are low \
               value and high quantity. Each group gets a management policy that fits it.",
    },
    SampleDocument {
        filename: "just-in-time.txt",
        title: "Just-in-Time (JIT) Inventory",
        category: "Inventory Management",
        text: "Just-in-time (JIT) inventory is a strategy that raises efficiency by receiving \
               goods only when they are needed for production or sales. Holding less stock \
               lowers inventory costs.",
    },
    SampleDocument {
        filename: "wms.txt",
        title: "Warehouse Management System (WMS)",
        category: "Systems",
        text: "A Warehouse Management System (WMS) is software that manages and optimizes \
               warehouse operations, including receiving, storage, picking, packing and \
               shipping.",
    },
    SampleDocument {
        filename: "barcode-scanning.txt",
        title: "Barcode Scanning",
        category: "Systems",
        text: "Barcode scanning uses optical readers to capture product information. It makes \
               inventory tracking and order fulfillment faster and more accurate.",
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_samples_are_distinct_and_non_empty() {
        assert_eq!(SAMPLES.len(), 8);
        let names: HashSet<_> = SAMPLES.iter().map(|s| s.filename).collect();
        assert_eq!(names.len(), SAMPLES.len());
        assert!(SAMPLES.iter().all(|s| !s.text.trim().is_empty()));
    }
}
